pub mod addon;
pub mod health;
