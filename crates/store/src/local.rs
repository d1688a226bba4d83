//! Bounded in-process cache (L1) with LRU eviction and per-entry expiry.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use llm_cache_core::MAX_TTL;

/// Capacity served by one shard before the cache splits into more.
const ENTRIES_PER_SHARD: usize = 1024;
const MAX_SHARDS: usize = 16;

/// Stored entry with expiry.
#[derive(Debug)]
struct LocalEntry {
    /// Cached payload. Shared, never mutated in place.
    value: Bytes,
    /// When the value was produced (may predate insertion on promotion).
    stored_at: Instant,
    expires_at: Instant,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A live L1 entry.
#[derive(Debug, Clone)]
pub struct LocalHit {
    pub value: Bytes,
    pub age: Duration,
    pub remaining: Duration,
}

/// L1 statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalCacheStats {
    pub entries: usize,
    pub max_entries: usize,
    /// Entries dropped for capacity.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
}

/// In-process LRU cache split into independently locked shards.
///
/// Each shard is an `LruCache` behind its own mutex, so every operation is
/// O(1) and only contends with keys hashing to the same shard. Small caches
/// use a single shard and evict in exact LRU order; larger ones evict the
/// least-recently-used entry of the shard receiving the insert. Expired
/// entries are purged lazily on read and optionally swept in the background.
#[derive(Debug)]
pub struct LocalCache {
    shards: Box<[Mutex<LruCache<String, LocalEntry>>]>,
    hasher: RandomState,
    max_entries: usize,
    default_ttl: Duration,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalCache {
    /// Create a cache holding at most `max_entries` (minimum 1).
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let max_entries = max_entries.max(1);
        let shard_count = (max_entries / ENTRIES_PER_SHARD).clamp(1, MAX_SHARDS);
        let shards = (0..shard_count)
            .map(|i| {
                // Spread the remainder so shard capacities sum to `max_entries`.
                let capacity = max_entries / shard_count + usize::from(i < max_entries % shard_count);
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
                ))
            })
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
            max_entries,
            default_ttl,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<LruCache<String, LocalEntry>> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, purging it if it has expired.
    pub fn get(&self, key: &str) -> Option<LocalHit> {
        let now = Instant::now();
        let mut shard = self.shard(key).lock();
        let entry = shard.get(key)?;
        if !entry.is_expired(now) {
            return Some(LocalHit {
                value: entry.value.clone(),
                age: now.saturating_duration_since(entry.stored_at),
                remaining: entry.expires_at.saturating_duration_since(now),
            });
        }

        shard.pop(key);
        drop(shard);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = key, "L1 entry expired on read");
        None
    }

    /// Insert a value. `None` uses the default TTL.
    pub fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        self.insert(key, value, ttl.unwrap_or(self.default_ttl), Duration::ZERO);
    }

    /// Insert a value that was produced `age` ago, e.g. promoted from L2.
    pub fn put_with_age(&self, key: &str, value: Bytes, ttl: Duration, age: Duration) {
        self.insert(key, value, ttl, age);
    }

    fn insert(&self, key: &str, value: Bytes, ttl: Duration, age: Duration) {
        if ttl.is_zero() {
            self.remove(key);
            return;
        }

        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or_else(|| now + MAX_TTL);
        let entry = LocalEntry {
            value,
            stored_at: now.checked_sub(age).unwrap_or(now),
            expires_at,
        };

        // `push` hands back either the replaced value for this key or the
        // shard's least-recently-used entry.
        let displaced = self.shard(key).lock().push(key.to_string(), entry);
        match displaced {
            Some((old_key, _)) if old_key == key => {}
            Some((old_key, old)) if old.is_expired(now) => {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %old_key, "Dropped expired L1 entry for capacity");
            }
            Some((old_key, _)) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %old_key, "Evicted least-recently-used L1 entry");
            }
            None => {}
        }
    }

    /// Remove one key. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).lock().pop(key).is_some()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let now = Instant::now();
            let mut shard = shard.lock();
            let expired: Vec<String> = shard
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                shard.pop(key);
            }
            removed += expired.len();
        }
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> LocalCacheStats {
        LocalCacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Periodically purge expired entries.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged = purged, "Swept expired L1 entries");
                }
            }
        })
    }
}
