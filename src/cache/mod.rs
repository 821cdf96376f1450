//! In-memory TTL cache.
//!
//! Entries are not removed the instant they expire: every read re-checks
//! expiry and deletes stale entries it runs into, and a background sweep
//! ([`spawn_cache_sweeper`]) reclaims entries nobody reads again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::sweeper::spawn_sweeper;

/// TTL used for entries stored with a zero TTL.
pub const NEVER_EXPIRES: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Entry in the cache.
struct CacheItem<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
}

impl<V> CacheItem<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// Entries currently stored, expired or not.
    pub size: usize,
    /// `hits / (hits + misses)`, 0.0 before the first lookup.
    pub hit_rate: f64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheItem<V>>,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    /// Remove `key` if it has expired. Returns `true` when it was removed.
    fn evict_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|item| item.is_expired(now));
        if expired {
            self.entries.remove(key);
            self.stats.evictions += 1;
        }
        expired
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, item| !item.is_expired(now));
        let removed = before - self.entries.len();
        self.stats.evictions += removed as u64;
        removed
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, item)| item.created_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

/// Thread-safe key/value store with per-entry expiry.
///
/// Statistics are kept under the same lock as the entries so they never
/// drift from the map they describe.
pub struct TtlCache<V> {
    state: Mutex<CacheState<V>>,
    default_ttl: Duration,
    max_entries: Option<usize>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache. `max_entries` bounds the map; `None` means unbounded.
    pub fn new(default_ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            default_ttl,
            max_entries,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.default_ttl_secs), config.max_entries)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Value stored under `key`, unless it is missing or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.evict_if_expired(key, now);

        let value = state.entries.get(key).map(|item| item.value.clone());
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        value
    }

    /// Store `value` for `ttl`. A zero TTL keeps the entry for
    /// [`NEVER_EXPIRES`].
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let ttl = if ttl.is_zero() { NEVER_EXPIRES } else { ttl };
        let expires_at = now.checked_add(ttl).unwrap_or(now + NEVER_EXPIRES);

        let mut state = self.state.lock();
        if let Some(max) = self.max_entries {
            if !state.entries.contains_key(&key) && state.entries.len() >= max {
                if state.purge_expired(now) == 0 {
                    state.evict_oldest();
                }
            }
        }

        state.entries.insert(
            key,
            CacheItem {
                value,
                created_at: now,
                expires_at,
            },
        );
        state.stats.sets += 1;
    }

    /// Store `value` with the cache's default TTL.
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Remove `key`. Returns `true` if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.entries.remove(key) {
            Some(item) if !item.is_expired(now) => {
                state.stats.deletes += 1;
                true
            }
            Some(_) => {
                state.stats.evictions += 1;
                false
            }
            None => false,
        }
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - state.entries.len();
        state.stats.deletes += removed as u64;
        removed
    }

    /// Whether a live entry exists for `key`. Does not touch hit/miss counts.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.evict_if_expired(key, now);
        state.entries.contains_key(key)
    }

    /// Time left before `key` expires.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.evict_if_expired(key, now);
        state
            .entries
            .get(key)
            .map(|item| item.expires_at.saturating_duration_since(now))
    }

    /// Give a live entry a new TTL counted from now.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let ttl = if ttl.is_zero() { NEVER_EXPIRES } else { ttl };
        let mut state = self.state.lock();
        state.evict_if_expired(key, now);
        match state.entries.get_mut(key) {
            Some(item) => {
                item.expires_at = now.checked_add(ttl).unwrap_or(now + NEVER_EXPIRES);
                true
            }
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let removed = state.entries.len() as u64;
        state.entries.clear();
        state.stats.deletes += removed;
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, item)| !item.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats;
        stats.size = state.entries.len();
        let lookups = stats.hits + stats.misses;
        stats.hit_rate = if lookups == 0 {
            0.0
        } else {
            stats.hits as f64 / lookups as f64
        };
        stats
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.state.lock().purge_expired(Instant::now())
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        // Default: 5 minute TTL, unbounded
        Self::new(Duration::from_secs(300), None)
    }
}

/// Periodically run [`TtlCache::cleanup_expired`] until `cancel` fires.
pub fn spawn_cache_sweeper<V>(
    cache: &Arc<TtlCache<V>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    spawn_sweeper("cache", cache, interval, cancel, TtlCache::<V>::cleanup_expired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn get_before_and_after_expiry() {
        let cache = TtlCache::new(Duration::from_secs(60), None);
        cache.set("k", 42u32, Duration::from_secs(10));
        assert_eq!(cache.get("k"), Some(42));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("k"), Some(42));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        // Expired entry was deleted on access.
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_effectively_never_expires() {
        let cache = TtlCache::new(Duration::from_secs(60), None);
        cache.set("forever", "v".to_string(), Duration::ZERO);
        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 3600)).await;
        assert_eq!(cache.get("forever").as_deref(), Some("v"));
        assert!(cache.ttl("forever").unwrap() > Duration::from_secs(80 * 365 * 24 * 3600));
    }

    #[tokio::test(start_paused = true)]
    async fn exists_self_heals() {
        let cache = TtlCache::new(Duration::from_secs(5), None);
        cache.set_default("k", 1u8);
        assert!(cache.exists("k"));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!cache.exists("k"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_and_expire() {
        let cache = TtlCache::new(Duration::from_secs(60), None);
        cache.set("k", 1u8, Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.ttl("k"), Some(Duration::from_secs(20)));

        assert!(cache.expire("k", Duration::from_secs(100)));
        assert_eq!(cache.ttl("k"), Some(Duration::from_secs(100)));
        assert!(!cache.expire("missing", Duration::from_secs(1)));
        assert_eq!(cache.ttl("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_clear_and_keys() {
        let cache = TtlCache::new(Duration::from_secs(60), None);
        cache.set_default("b", 2u8);
        cache.set_default("a", 1u8);
        cache.set("short", 3u8, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        assert_eq!(cache.get("b"), None);
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let cache = TtlCache::default();
        cache.set_default("match:1", 1u8);
        cache.set_default("match:2", 2u8);
        cache.set_default("info:1", 3u8);
        assert_eq!(cache.delete_prefix("match:"), 2);
        assert_eq!(cache.keys(), vec!["info:1".to_string()]);
    }

    #[tokio::test]
    async fn stats_track_lookups() {
        let cache = TtlCache::default();
        cache.set_default("k", 1u8);
        cache.get("k");
        cache.get("k");
        cache.get("k");
        cache.get("missing");
        cache.delete("k");

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.size, 0);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest() {
        let cache = TtlCache::new(Duration::from_secs(60), Some(2));
        cache.set_default("first", 1u8);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set_default("second", 2u8);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set_default("third", 3u8);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("first"), None);
        assert_eq!(cache.get("third"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_unread_entries() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(1), None));
        cache.set_default("a", 1u8);
        cache.set_default("b", 2u8);

        let cancel = CancellationToken::new();
        let handle = spawn_cache_sweeper(&cache, Duration::from_secs(300), cancel.clone());
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 2);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_disjoint_keys_do_not_interfere() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60), None));
        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..200u32 {
                    let key = format!("w{worker}:{i}");
                    cache.set_default(key.clone(), worker * 1000 + i);
                    assert_eq!(cache.get(&key), Some(worker * 1000 + i));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len(), 1600);
        assert_eq!(cache.stats().hits, 1600);
    }
}
