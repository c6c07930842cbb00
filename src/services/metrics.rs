//! Prometheus collectors for the channel cache, exported by `GET /metrics`

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

lazy_static! {
    /// Cache lookups by outcome: hit, miss (started a refresh) or joined (awaited one)
    pub static ref CACHE_LOOKUPS: IntCounterVec = register_int_counter_vec!(
        "playlist_cache_lookups_total",
        "Channel cache lookups by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref FETCH_FAILURES: IntCounter = register_int_counter!(
        "playlist_fetch_failures_total",
        "Playlist refreshes that returned no data"
    )
    .unwrap();

    /// Channel count of the most recent successful refresh
    pub static ref CACHED_CHANNELS: IntGauge = register_int_gauge!(
        "playlist_cached_channels",
        "Channels parsed on the latest refresh"
    )
    .unwrap();

    pub static ref CACHE_SLOTS: IntGauge = register_int_gauge!(
        "playlist_cache_slots",
        "Configurations currently tracked by the channel cache"
    )
    .unwrap();

    pub static ref CACHE_EVICTIONS: IntCounter = register_int_counter!(
        "playlist_cache_evictions_total",
        "Cache slots dropped after a failed first fetch or on expiry"
    )
    .unwrap();
}
