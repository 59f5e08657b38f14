//! In-process TTL cache with FIFO capacity eviction.
//!
//! One [`CacheManager`] per engine. All map mutation happens under a single
//! mutex, so a get-then-evict-then-insert sequence is atomic. The optional
//! background sweep only ever deletes expired entries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub max_size: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5 * 60 * 1000,
            max_size: 100,
            cleanup_interval_ms: 60 * 1000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Insertion time, epoch milliseconds.
    pub timestamp: u64,
    pub ttl_ms: u64,
}

impl<V> CacheEntry<V> {
    /// Expired once `now - timestamp >= ttl`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp) >= self.ttl_ms
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Store<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Keys in insertion order; always the same set as `entries`.
    order: VecDeque<String>,
    stats: CacheStats,
}

impl<V> Store<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&str, &CacheEntry<V>) -> bool) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| pred(key, entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.entries.remove(key);
        }
        if !doomed.is_empty() {
            self.order.retain(|key| self.entries.contains_key(key));
        }
        doomed.len()
    }

    fn purge_expired(&mut self, now_ms: u64) -> usize {
        let removed = self.remove_where(|_, entry| entry.is_expired_at(now_ms));
        self.stats.expirations += removed as u64;
        removed
    }
}

fn lock<V>(store: &Mutex<Store<V>>) -> MutexGuard<'_, Store<V>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct CacheManager<V> {
    config: CacheConfig,
    store: Arc<Mutex<Store<V>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<V: Clone + Send + 'static> CacheManager<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            store: Arc::new(Mutex::new(Store::new())),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, now_ms())
    }

    /// Fresh value for `key` as of `now_ms`; a stale entry is removed.
    pub fn get_at(&self, key: &str, now_ms: u64) -> Option<V> {
        let mut guard = lock(&self.store);
        let store = &mut *guard;
        let expired = match store.entries.get(key) {
            Some(entry) if !entry.is_expired_at(now_ms) => {
                let value = entry.value.clone();
                store.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            store.entries.remove(key);
            store.order.retain(|k| k != key);
            store.stats.expirations += 1;
        }
        store.stats.misses += 1;
        None
    }

    /// Stored and not yet expired. Does not count as a hit or miss.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = now_ms();
        lock(&self.store)
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Stored entries, expired or not, until the next sweep.
    pub fn len(&self) -> usize {
        lock(&self.store).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.store).order.iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let store = lock(&self.store);
        CacheStats {
            entries: store.entries.len(),
            ..store.stats
        }
    }

    // ── Writes ─────────────────────────────────────────────────────

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, self.config.default_ttl_ms, now_ms());
    }

    /// TTLs beyond `u64::MAX` milliseconds are clamped, which never expires in practice.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.set_at(key, value, ttl_ms, now_ms());
    }

    /// Insert or overwrite. At capacity, a new key first evicts the oldest
    /// inserted entry; an overwrite keeps its place and evicts nothing.
    pub fn set_at(&self, key: impl Into<String>, value: V, ttl_ms: u64, now_ms: u64) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            timestamp: now_ms,
            ttl_ms,
        };
        let mut store = lock(&self.store);
        if let Some(existing) = store.entries.get_mut(&key) {
            *existing = entry;
            return;
        }
        if store.entries.len() >= self.config.max_size.max(1) {
            if let Some(oldest) = store.order.pop_front() {
                store.entries.remove(&oldest);
                store.stats.evictions += 1;
                log::debug!("Cache full, evicted {oldest}");
            }
        }
        store.order.push_back(key.clone());
        store.entries.insert(key, entry);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut store = lock(&self.store);
        let removed = store.entries.remove(key).is_some();
        if removed {
            store.order.retain(|k| k != key);
        }
        removed
    }

    /// Remove every key matching `pattern`; returns how many were removed.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let removed = lock(&self.store).remove_where(|key, _| pattern.is_match(key));
        log::debug!("Invalidated {removed} cache entries matching /{pattern}/");
        removed
    }

    /// Like [`invalidate_pattern`](Self::invalidate_pattern) with the pattern compiled from a string.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        Ok(self.invalidate_pattern(&regex))
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(now_ms())
    }

    pub fn purge_expired_at(&self, now_ms: u64) -> usize {
        lock(&self.store).purge_expired(now_ms)
    }

    pub fn clear(&self) {
        let mut store = lock(&self.store);
        store.entries.clear();
        store.order.clear();
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Spawn the periodic sweep on the current tokio runtime.
    ///
    /// Idempotent. Fails with [`Error::Config`] outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut sweeper = lock_sweeper(&self.sweeper);
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("cache sweep needs a tokio runtime: {e}")))?;
        let store = Arc::downgrade(&self.store);
        let interval = self.config.cleanup_interval();
        *sweeper = Some(runtime.spawn(sweep(store, interval)));
        log::debug!("Cache sweep started every {}ms", self.config.cleanup_interval_ms);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(handle) = lock_sweeper(&self.sweeper).take() {
            handle.abort();
            log::debug!("Cache sweep stopped");
        }
    }

    /// Stop the sweep and drop every entry.
    pub fn destroy(&self) {
        self.stop();
        self.clear();
    }
}

impl<V> CacheManager<V> {
    pub fn is_running(&self) -> bool {
        lock_sweeper(&self.sweeper)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl<V> Drop for CacheManager<V> {
    fn drop(&mut self) {
        if let Some(handle) = lock_sweeper(&self.sweeper).take() {
            handle.abort();
        }
    }
}

fn lock_sweeper(sweeper: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    sweeper.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sweep loop. Holds only a weak handle so a dropped cache ends the task.
async fn sweep<V>(store: Weak<Mutex<Store<V>>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
            break;
        };
        let removed = lock(&store).purge_expired(now_ms());
        if removed > 0 {
            log::debug!("Cache sweep removed {removed} expired entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> CacheManager<i32> {
        CacheManager::new(CacheConfig {
            default_ttl_ms: 1_000,
            max_size,
            cleanup_interval_ms: 60_000,
        })
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let cache = cache(10);
        cache.set_at("a", 1, 1_000, 10_000);
        assert_eq!(cache.get_at("a", 10_000), Some(1));
        assert_eq!(cache.get_at("a", 10_999), Some(1));
    }

    #[test]
    fn test_absent_once_ttl_elapsed() {
        let cache = cache(10);
        cache.set_at("a", 1, 1_000, 10_000);
        assert_eq!(cache.get_at("a", 11_000), None);
        // Lazily removed
        assert_eq!(cache.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_default_ttl_used_by_set() {
        let cache = cache(10);
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert!(cache.contains_key("a"));
        cache.set_with_ttl("b", 2, Duration::ZERO);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_oversized_ttl_is_clamped() {
        let cache = cache(10);
        cache.set_with_ttl("forever", 1, Duration::MAX);
        assert_eq!(cache.get("forever"), Some(1));
        let now = now_ms();
        let entry = lock(&cache.store).entries.get("forever").cloned().unwrap();
        assert_eq!(entry.ttl_ms, u64::MAX);
        assert!(!entry.is_expired_at(now.saturating_add(365 * 86_400_000)));
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let cache = cache(3);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.set_at(*key, i as i32, 1_000, 0);
        }
        // Reading "a" does not refresh its position
        assert_eq!(cache.get_at("a", 0), Some(0));
        cache.set_at("d", 3, 1_000, 0);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get_at("a", 0), None);
        assert_eq!(cache.keys(), vec!["b", "c", "d"]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_keeps_position_and_never_evicts() {
        let cache = cache(2);
        cache.set_at("a", 1, 1_000, 0);
        cache.set_at("b", 2, 1_000, 0);
        cache.set_at("a", 10, 1_000, 500);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get_at("a", 1_200), Some(10));
        cache.set_at("c", 3, 1_000, 600);
        assert_eq!(cache.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let cache = cache(5);
        for i in 0..50 {
            cache.set_at(format!("k{i}"), i, 1_000, 0);
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.keys(), vec!["k45", "k46", "k47", "k48", "k49"]);
    }

    #[test]
    fn test_invalidate_pattern() {
        let cache = cache(10);
        cache.set_at("metric:a:{}", 1, 1_000, 0);
        cache.set_at("metric:a:{\"x\":1}", 2, 1_000, 0);
        cache.set_at("metric:ab:{}", 3, 1_000, 0);
        cache.set_at("other", 4, 1_000, 0);
        let removed = cache.invalidate_pattern(&Regex::new("^metric:a:").unwrap());
        assert_eq!(removed, 2);
        assert_eq!(cache.keys(), vec!["metric:ab:{}", "other"]);
        assert_eq!(cache.invalidate_matching("^metric:").unwrap(), 1);
        assert_eq!(cache.keys(), vec!["other"]);
    }

    #[test]
    fn test_invalidate_matching_rejects_bad_regex() {
        let cache = cache(10);
        assert!(cache.invalidate_matching("(").is_err());
    }

    #[test]
    fn test_invalidate_single_key() {
        let cache = cache(10);
        cache.set_at("a", 1, 1_000, 0);
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(10);
        cache.set_at("old", 1, 100, 0);
        cache.set_at("new", 2, 10_000, 0);
        assert_eq!(cache.purge_expired_at(100), 1);
        assert_eq!(cache.keys(), vec!["new"]);
        assert_eq!(cache.purge_expired_at(100), 0);
    }

    #[test]
    fn test_start_without_runtime() {
        let cache = cache(10);
        assert!(matches!(cache.start(), Err(Error::Config(_))));
        assert!(!cache.is_running());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let cache = CacheManager::new(CacheConfig {
            default_ttl_ms: 10,
            max_size: 10,
            cleanup_interval_ms: 20,
        });
        cache.set("a", 1);
        cache.start().unwrap();
        cache.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.len(), 0);
        assert!(cache.stats().expirations >= 1);
        cache.stop();
        assert!(!cache.is_running());
    }

    #[tokio::test]
    async fn test_destroy_clears_and_stops() {
        let cache = cache(10);
        cache.set("a", 1);
        cache.start().unwrap();
        assert!(cache.is_running());
        cache.destroy();
        assert!(!cache.is_running());
        assert!(cache.is_empty());
    }
}
