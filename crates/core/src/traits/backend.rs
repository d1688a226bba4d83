//! Distributed cache backend traits.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;

/// Networked key-value store shared by every process of the cluster.
///
/// Implementations report failures as errors; deciding that a failure is a
/// miss or a no-op is the gateway's job.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and stats.
    fn name(&self) -> &str;

    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check reachability.
    async fn ping(&self) -> Result<()>;

    /// Atomically set `lock_key` to `token` if absent, expiring after `ttl`.
    ///
    /// Returns `true` if the lock was acquired.
    async fn try_acquire_lock(&self, lock_key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Atomically delete `lock_key` only if it still holds `token`.
    ///
    /// Returns `true` if this call removed the lock. Releasing an expired or
    /// foreign lock is not an error.
    async fn release_lock(&self, lock_key: &str, token: &str) -> Result<bool>;

    /// Number of cached values, if the backend can count them.
    async fn approximate_len(&self) -> Result<Option<usize>> {
        Ok(None)
    }
}
