//! In-memory distributed-tier backend using DashMap.
//!
//! Stands in for a shared key-value store: every gateway holding the same
//! `Arc<InMemoryBackend>` behaves like a process pointed at the same server.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use llm_cache_core::{traits::CacheBackend, Error, Result, MAX_TTL};

/// Stored value with expiry.
#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        let ttl = ttl.min(MAX_TTL);
        Self {
            value,
            expires_at: now.checked_add(ttl).unwrap_or_else(|| now + MAX_TTL),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory backend with a reachability switch for outage simulation.
#[derive(Debug)]
pub struct InMemoryBackend {
    data: DashMap<String, StoredValue>,
    reachable: AtomicBool,
    /// Operations attempted, including rejected ones.
    calls: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new, reachable backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            reachable: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Make every subsequent operation fail (`false`) or succeed (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of operations attempted so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether a live value is stored under `key`, bypassing reachability.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data.get(key).map_or(false, |v| v.is_live(now))
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::backend("in-memory backend is unreachable"))
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check()?;
        let now = Instant::now();
        if let Some(stored) = self.data.get(key) {
            if stored.is_live(now) {
                return Ok(Some(stored.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.data.remove_if(key, |_, v| !v.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check()?;
        if ttl.is_zero() {
            self.data.remove(key);
        } else {
            self.data.insert(key.to_string(), StoredValue::new(value, ttl));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .data
            .remove(key)
            .map_or(false, |(_, v)| v.is_live(now)))
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn try_acquire_lock(&self, lock_key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        let lock = StoredValue::new(Bytes::copy_from_slice(token.as_bytes()), ttl);
        match self.data.entry(lock_key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_live(now) {
                    Ok(false)
                } else {
                    held.insert(lock);
                    Ok(true)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lock);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, lock_key: &str, token: &str) -> Result<bool> {
        self.check()?;
        Ok(self
            .data
            .remove_if(lock_key, |_, v| v.value.as_ref() == token.as_bytes())
            .is_some())
    }

    async fn approximate_len(&self) -> Result<Option<usize>> {
        self.check()?;
        let now = Instant::now();
        let count = self
            .data
            .iter()
            .filter(|e| !e.key().starts_with("lock:") && e.value().is_live(now))
            .count();
        Ok(Some(count))
    }
}
