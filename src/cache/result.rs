//! TTL cache of extraction outcomes.

use super::CacheKey;
use crate::models::ExtractionOutcome;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Result cache configuration.
#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    /// How long a stored outcome stays valid.
    ///
    /// Default: 5 minutes.
    pub ttl: Duration,
    /// Maximum number of entries; the oldest stored entry is evicted first.
    ///
    /// Default: 500.
    pub max_entries: usize,
    /// Window during which identical in-flight requests are coalesced.
    ///
    /// Default: 60 seconds.
    pub dedup_window: Duration,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 500,
            dedup_window: Duration::from_secs(60),
        }
    }
}

impl ResultCacheConfig {
    /// Sets the TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the capacity (minimum 1).
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Sets the coalescing window.
    #[must_use]
    pub const fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: ExtractionOutcome,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Bounded, TTL-based cache of outcomes keyed by [`CacheKey`].
///
/// Reads use `peek`, so eviction order is store order, not read order.
/// Expired entries are dropped lazily on read, before evicting live entries
/// on a full put, and by [`ResultCache::sweep`].
///
/// # Lock Poisoning
///
/// Poisoned locks are recovered: a panic elsewhere costs at most a cache
/// miss, never a failed submission.
pub struct ResultCache {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    default_ttl: Duration,
}

impl ResultCache {
    /// Creates a cache with the given capacity and default TTL.
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    /// Creates a cache from configuration.
    #[must_use]
    pub fn from_config(config: &ResultCacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    /// Returns the stored outcome if present and not expired.
    #[instrument(skip(self), fields(operation = "cache_get"))]
    pub fn get(&self, key: &CacheKey) -> Option<ExtractionOutcome> {
        let entry = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.peek(key).cloned()
        }?;

        if entry.is_expired() {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if entries.peek(key).is_some_and(CacheEntry::is_expired) {
                entries.pop(key);
            }
            drop(entries);
            tracing::debug!(key = %key, "Cache entry expired");
            metrics::counter!("cache_lookups_total", "result" => "expired").increment(1);
            return None;
        }

        metrics::counter!("cache_lookups_total", "result" => "hit").increment(1);
        Some(entry.outcome)
    }

    /// Stores `outcome` under the default TTL, replacing any previous value.
    pub fn put(&self, key: CacheKey, outcome: ExtractionOutcome) {
        self.put_with_ttl(key, outcome, self.default_ttl);
    }

    /// Stores `outcome` under an explicit TTL.
    pub fn put_with_ttl(&self, key: CacheKey, outcome: ExtractionOutcome, ttl: Duration) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= entries.cap().get() && !entries.contains(&key) {
            Self::purge_expired(&mut entries);
        }
        let stored_key = key.clone();
        let evicted = entries.push(
            key,
            CacheEntry {
                outcome,
                stored_at: Instant::now(),
                ttl,
            },
        );
        let len = entries.len();
        drop(entries);

        // `push` also returns the replaced value on overwrite; only a
        // different key means a capacity eviction.
        if let Some((evicted_key, _)) = evicted.filter(|(k, _)| *k != stored_key) {
            tracing::debug!(key = %evicted_key, "Evicted oldest cache entry");
            metrics::counter!("cache_evictions_total", "reason" => "capacity").increment(1);
        }
        publish_len(len);
    }

    /// Removes the entry for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.pop(key).is_some();
        let len = entries.len();
        drop(entries);
        publish_len(len);
        removed
    }

    /// Drops all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = Self::purge_expired(&mut entries);
        let len = entries.len();
        drop(entries);
        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        publish_len(len);
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        publish_len(0);
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(entries: &mut LruCache<CacheKey, CacheEntry>) -> usize {
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            metrics::counter!("cache_evictions_total", "reason" => "expired")
                .increment(expired.len() as u64);
        }
        expired.len()
    }
}

#[allow(clippy::cast_precision_loss)]
fn publish_len(len: usize) {
    metrics::gauge!("cache_entries").set(len as f64);
}
