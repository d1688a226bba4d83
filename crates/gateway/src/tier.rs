//! The distributed tier as seen by the gateway.
//!
//! Wraps a [`CacheBackend`] with the entry envelope, failure accounting and
//! the reachability switch used in auto mode.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llm_cache_core::{CacheBackend, CacheEntry, CacheKey, Error, L2Mode, MAX_TTL};
use llm_cache_telemetry::track_backend_failure;

pub struct L2Tier {
    backend: Arc<dyn CacheBackend>,
    mode: L2Mode,
    enabled: AtomicBool,
    failures: AtomicU64,
    decode_failures: AtomicU64,
}

impl L2Tier {
    /// Forced tiers start enabled. Auto tiers stay off until a probe succeeds.
    pub fn new(backend: Arc<dyn CacheBackend>, mode: L2Mode) -> Self {
        Self {
            backend,
            mode,
            enabled: AtomicBool::new(mode == L2Mode::Forced),
            failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> L2Mode {
        self.mode
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Whether calls should use the tier right now.
    pub fn is_active(&self) -> bool {
        self.mode != L2Mode::Disabled && self.enabled.load(Ordering::SeqCst)
    }

    /// Failed backend operations so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Stored entries that could not be decoded or encoded.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Account for a failed operation. In auto mode this switches the tier off
    /// until the next successful probe.
    pub fn record_failure(&self, op: &'static str, err: &Error) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        track_backend_failure(op);
        tracing::warn!(
            backend = self.backend.name(),
            op = op,
            error = %err,
            "Distributed cache operation failed, continuing without it"
        );

        if self.mode == L2Mode::Auto && self.enabled.swap(false, Ordering::SeqCst) {
            tracing::warn!(
                backend = self.backend.name(),
                "Distributed cache disabled until the next successful probe"
            );
        }
    }

    /// Fetch a live entry. Failures and undecodable entries read as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let raw = match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.record_failure("get", &e);
                return None;
            }
        };

        match CacheEntry::decode(&raw) {
            Ok(entry) if entry.is_expired() => None,
            Ok(entry) => Some(entry),
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Discarding undecodable distributed cache entry");
                None
            }
        }
    }

    /// Store an entry. Returns whether it was written.
    pub async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let ttl = ttl.min(MAX_TTL);

        let encoded = match CacheEntry::new(value, ttl).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Failed to encode distributed cache entry");
                return false;
            }
        };

        match self.backend.set(key.as_str(), encoded, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.record_failure("set", &e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        match self.backend.delete(key.as_str()).await {
            Ok(removed) => removed,
            Err(e) => {
                self.record_failure("delete", &e);
                false
            }
        }
    }

    /// Reachability check without side effects on the tier state.
    pub async fn ping(&self) -> bool {
        self.backend.ping().await.is_ok()
    }

    /// Reachability check that, in auto mode, switches the tier on or off.
    pub async fn probe(&self) -> bool {
        let reachable = match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(backend = self.backend.name(), error = %e, "Distributed cache probe failed");
                false
            }
        };

        if self.mode == L2Mode::Auto {
            let was = self.enabled.swap(reachable, Ordering::SeqCst);
            if was != reachable {
                tracing::info!(
                    backend = self.backend.name(),
                    enabled = reachable,
                    "Distributed cache availability changed"
                );
            }
        }
        reachable
    }

    /// Entry count reported by the backend, if it can tell.
    pub async fn len(&self) -> Option<usize> {
        match self.backend.approximate_len().await {
            Ok(len) => len,
            Err(e) => {
                self.record_failure("len", &e);
                None
            }
        }
    }
}
