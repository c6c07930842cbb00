pub mod channel_cache;
pub mod config_codec;
pub mod fetcher;
pub mod m3u_parser;
pub mod metrics;
