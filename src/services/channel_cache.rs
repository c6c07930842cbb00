use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::models::{Channel, SourceConfig};
use crate::services::fetcher::PlaylistFetcher;
use crate::services::m3u_parser::parse_playlist;
use crate::services::metrics::{
    CACHED_CHANNELS, CACHE_EVICTIONS, CACHE_LOOKUPS, CACHE_SLOTS, FETCH_FAILURES,
};

/// How long a parsed playlist is served without refetching (10 hours)
pub const CACHE_TTL: Duration = Duration::from_secs(36_000);

/// How often expired entries are swept out of the cache
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(600);

/// Shared, immutable parse result
pub type Channels = Arc<Vec<Channel>>;

/// In-flight refresh shared by every caller waiting on the same key.
/// Resolves to `None` when the fetch failed.
type Refresh = Shared<BoxFuture<'static, Option<Channels>>>;

type SlotMap = HashMap<SourceConfig, Arc<Mutex<Slot>>>;

/// Point-in-time snapshot of one playlist parse
struct CacheEntry {
    channels: Channels,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
}

impl CacheEntry {
    fn new(channels: Channels) -> Self {
        Self {
            channels,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Per-key state: the last good entry plus any refresh in progress
#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    refresh: Option<Refresh>,
}

/// Read-only view of a cache entry (for health reporting)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryInfo {
    /// Source with credentials stripped
    pub source: String,
    pub target: Option<String>,
    pub channels: usize,
    pub fetched_at: DateTime<Utc>,
    pub fresh: bool,
}

/// Time-bounded cache of parsed playlists keyed by source and substitution target.
///
/// - Fresh entries are returned without I/O.
/// - Absent or stale keys trigger one refresh; concurrent callers for the same
///   key await that refresh instead of fetching again.
/// - A failed refresh yields an empty list and leaves any stale entry in place,
///   so the next call retries. A key whose first fetch fails is forgotten.
/// - Refreshes run as spawned tasks and finish even if every caller goes away.
/// - [`ChannelCache::evict_expired`] drops entries past the TTL.
pub struct ChannelCache {
    fetcher: Arc<dyn PlaylistFetcher>,
    ttl: Duration,
    slots: Arc<RwLock<SlotMap>>,
}

impl ChannelCache {
    pub fn new(fetcher: Arc<dyn PlaylistFetcher>) -> Self {
        Self {
            fetcher,
            ttl: CACHE_TTL,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the channels for a configuration. Never fails; an unreachable
    /// upstream degrades to an empty list.
    pub async fn get(&self, config: &SourceConfig) -> Channels {
        let slot = self.slot(config).await;

        let refresh = {
            let mut guard = slot.lock().await;

            if let Some(entry) = guard.entry.as_ref().filter(|e| e.is_fresh(self.ttl)) {
                CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                return Arc::clone(&entry.channels);
            }

            // A completed refresh still parked here means its task died
            let in_flight = guard
                .refresh
                .as_ref()
                .filter(|refresh| refresh.peek().is_none())
                .cloned();

            match in_flight {
                Some(refresh) => {
                    CACHE_LOOKUPS.with_label_values(&["joined"]).inc();
                    refresh
                }
                None => {
                    CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                    let refresh = self.spawn_refresh(config.clone(), Arc::clone(&slot));
                    guard.refresh = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await.unwrap_or_default()
    }

    /// Snapshot of every stored entry, sorted by source then target
    pub async fn snapshot(&self) -> Vec<CacheEntryInfo> {
        let slots: Vec<(SourceConfig, Arc<Mutex<Slot>>)> = {
            let slots = self.slots.read().await;
            slots
                .iter()
                .map(|(config, slot)| (config.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut infos = Vec::with_capacity(slots.len());
        for (config, slot) in slots {
            let guard = slot.lock().await;
            if let Some(entry) = &guard.entry {
                infos.push(CacheEntryInfo {
                    source: config.redacted_source(),
                    target: config.substitution_target().map(str::to_string),
                    channels: entry.channels.len(),
                    fetched_at: entry.fetched_at_utc,
                    fresh: entry.is_fresh(self.ttl),
                });
            }
        }

        infos.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        infos
    }

    /// Number of configurations tracked, including ones still on their first fetch
    pub async fn tracked(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Drop every slot whose entry is past the TTL (or missing) and that has no
    /// refresh running. Slots busy with a caller are left for the next sweep.
    pub async fn evict_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut slots = self.slots.write().await;
        let before = slots.len();

        slots.retain(|_, slot| {
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            guard.refresh.is_some() || guard.entry.as_ref().is_some_and(|e| e.is_fresh(ttl))
        });

        let evicted = before - slots.len();
        CACHE_SLOTS.set(slots.len() as i64);
        CACHE_EVICTIONS.inc_by(evicted as u64);
        evicted
    }

    /// Sweep expired entries forever, once per `every`
    pub async fn run_eviction(&self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = self.evict_expired().await;
            if evicted > 0 {
                tracing::info!(evicted, "Evicted expired playlists");
            }
        }
    }

    async fn slot(&self, config: &SourceConfig) -> Arc<Mutex<Slot>> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(config) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        let slot = Arc::clone(
            slots
                .entry(config.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::default()))),
        );
        CACHE_SLOTS.set(slots.len() as i64);
        slot
    }

    /// Start fetch + parse for a key. The task stores its result in the slot
    /// and clears the in-flight marker before any waiter observes the outcome.
    fn spawn_refresh(&self, config: SourceConfig, slot: Arc<Mutex<Slot>>) -> Refresh {
        let fetcher = Arc::clone(&self.fetcher);
        let slots = Arc::clone(&self.slots);

        let handle = tokio::spawn(async move {
            let source = config.redacted_source();
            let substitution = config.substitution_target().unwrap_or("original");
            tracing::info!(source = %source, target = substitution, "Refreshing playlist");

            let outcome = match fetcher.fetch(config.source()).await {
                Ok(text) => {
                    let channels = Arc::new(parse_playlist(&text, config.substitution_target()));
                    CACHED_CHANNELS.set(channels.len() as i64);
                    tracing::info!(
                        source = %source,
                        target = substitution,
                        channels = channels.len(),
                        "Playlist cached"
                    );
                    Some(channels)
                }
                Err(e) => {
                    FETCH_FAILURES.inc();
                    tracing::warn!(
                        source = %source,
                        target = substitution,
                        error = %e,
                        "Playlist refresh failed"
                    );
                    None
                }
            };

            match &outcome {
                Some(channels) => {
                    let mut guard = slot.lock().await;
                    guard.entry = Some(CacheEntry::new(Arc::clone(channels)));
                    guard.refresh = None;
                }
                None => {
                    // Map before slot, the same order `evict_expired` uses
                    let mut slots = slots.write().await;
                    let mut guard = slot.lock().await;
                    guard.refresh = None;

                    let owned = slots
                        .get(&config)
                        .is_some_and(|current| Arc::ptr_eq(current, &slot));
                    if guard.entry.is_none() && owned {
                        slots.remove(&config);
                        CACHE_SLOTS.set(slots.len() as i64);
                        CACHE_EVICTIONS.inc();
                    }
                }
            }

            outcome
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Playlist refresh task aborted");
                None
            })
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fetcher::FetchError;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const PLAYLIST: &str = "#EXTM3U\n\
                            #EXTINF:-1 group-title=\"Sports\",Channel One\n\
                            http://127.0.0.1:8080/stream1\n\
                            #EXTINF:-1,Channel Two\n\
                            http://127.0.0.1:8080/stream2\n";

    /// Fetcher that counts calls and can be switched into failure mode
    struct ScriptedFetcher {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                delay: Duration::from_millis(50),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PlaylistFetcher for ScriptedFetcher {
        async fn fetch(&self, _source: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.failing.load(Ordering::SeqCst) {
                Err(FetchError::Status(503))
            } else {
                Ok(PLAYLIST.to_string())
            }
        }
    }

    fn config(target: Option<&str>) -> SourceConfig {
        SourceConfig::new("http://example.com/list.m3u", target.map(str::to_string))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_without_fetch() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());
        let config = config(Some("10.0.0.5"));

        let first = cache.get(&config).await;
        tokio::time::advance(CACHE_TTL - Duration::from_secs(60)).await;
        let second = cache.get(&config).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[0].url, "http://10.0.0.5:8080/stream1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_triggers_one_refetch() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());
        let config = config(None);

        let first = cache.get(&config).await;
        tokio::time::advance(CACHE_TTL + Duration::from_secs(1)).await;

        let second = cache.get(&config).await;
        let third = cache.get(&config).await;

        assert_eq!(fetcher.calls(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(*first, *second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());
        let config = config(Some("10.0.0.5"));

        let results = join_all((0..10).map(|_| cache.get(&config))).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(results.len(), 10);
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
        assert_eq!(results[0].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_failure() {
        let fetcher = ScriptedFetcher::new();
        fetcher.set_failing(true);
        let cache = ChannelCache::new(fetcher.clone());
        let config = config(None);

        let results = join_all((0..5).map(|_| cache.get(&config))).await;

        assert_eq!(fetcher.calls(), 1);
        assert!(results.iter().all(|r| r.is_empty()));

        // Failure is not cached; the next call retries
        fetcher.set_failing(false);
        let retried = cache.get(&config).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(retried.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_stale_entry_for_retry() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());
        let config = config(None);

        assert_eq!(cache.get(&config).await.len(), 2);
        tokio::time::advance(CACHE_TTL + Duration::from_secs(1)).await;

        fetcher.set_failing(true);
        assert!(cache.get(&config).await.is_empty());

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].channels, 2);
        assert!(!snapshot[0].fresh);

        fetcher.set_failing(false);
        assert_eq!(cache.get(&config).await.len(), 2);
        assert_eq!(fetcher.calls(), 3);
        assert!(cache.snapshot().await[0].fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());

        let original = cache.get(&config(None)).await;
        let substituted = cache.get(&config(Some("192.168.1.9"))).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(original[0].url, "http://127.0.0.1:8080/stream1");
        assert_eq!(substituted[0].url, "http://192.168.1.9:8080/stream1");
        assert_eq!(original[0].id, substituted[0].id);

        let targets: Vec<Option<String>> =
            cache.snapshot().await.into_iter().map(|i| i.target).collect();
        assert_eq!(targets, vec![None, Some("192.168.1.9".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_named_original_has_its_own_entry() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());

        let unchanged = cache.get(&config(None)).await;
        let named = cache.get(&config(Some("original"))).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(unchanged[0].url, "http://127.0.0.1:8080/stream1");
        assert_eq!(named[0].url, "http://original:8080/stream1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stale_callers_share_one_refetch() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());
        let config = config(Some("10.0.0.5"));

        let first = cache.get(&config).await;
        tokio::time::advance(CACHE_TTL + Duration::from_secs(1)).await;

        let results = join_all((0..10).map(|_| cache.get(&config))).await;

        assert_eq!(fetcher.calls(), 2);
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
        assert!(!Arc::ptr_eq(&first, &results[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_fetch_is_forgotten() {
        let fetcher = ScriptedFetcher::new();
        fetcher.set_failing(true);
        let cache = ChannelCache::new(fetcher.clone());

        for i in 0..100 {
            let config = SourceConfig::new(format!("http://bad{}.example/list.m3u", i), None);
            assert!(cache.get(&config).await.is_empty());
        }

        assert_eq!(fetcher.calls(), 100);
        assert_eq!(cache.tracked().await, 0);
        assert!(cache.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_drops_only_stale_entries() {
        let fetcher = ScriptedFetcher::new();
        let cache = ChannelCache::new(fetcher.clone());

        cache.get(&config(None)).await;
        tokio::time::advance(CACHE_TTL - Duration::from_secs(60)).await;
        cache.get(&config(Some("10.0.0.5"))).await;

        assert_eq!(cache.evict_expired().await, 0);
        assert_eq!(cache.tracked().await, 2);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cache.evict_expired().await, 1);

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].target.as_deref(), Some("10.0.0.5"));

        // An evicted key is fetched again on demand
        assert_eq!(cache.get(&config(None)).await.len(), 2);
        assert_eq!(fetcher.calls(), 3);
    }
}
