pub mod addon;
pub mod playlist;

pub use addon::*;
pub use playlist::{Channel, SourceConfig};
