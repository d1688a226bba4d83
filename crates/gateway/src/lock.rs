//! Cross-process stampede lock over the distributed tier.

use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use llm_cache_core::{CacheBackend, CacheKey, Error, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(25);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Result of trying to become the single computer of a key.
pub enum LockOutcome {
    /// We hold the lock and should compute.
    Acquired(LockGuard),
    /// Another holder wrote the value while we waited.
    Filled(Bytes),
    /// Wait budget exhausted; compute without the lock.
    TimedOut,
    /// The distributed tier failed; compute without the lock.
    Unavailable(Error),
}

/// A held lock. Dropping it without [`release`](Self::release) leaves the
/// lock to expire on its TTL.
pub struct LockGuard {
    backend: Arc<dyn CacheBackend>,
    lock_key: String,
    token: String,
    contended: bool,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether another holder had the lock before we got it.
    pub fn contended(&self) -> bool {
        self.contended
    }

    /// Release the lock if it still carries our token. Returns whether a lock
    /// was removed; `false` means it already expired or was taken over.
    pub async fn release(self) -> Result<bool> {
        self.backend.release_lock(&self.lock_key, &self.token).await
    }
}

/// Lock acquisition with bounded, jittered waiting.
#[derive(Clone)]
pub struct DistributedLock {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    max_wait: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, max_wait: Duration) -> Self {
        Self {
            backend,
            ttl,
            max_wait,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// One acquisition attempt with a fresh token.
    pub async fn try_acquire(&self, lock_key: &str) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        if self
            .backend
            .try_acquire_lock(lock_key, &token, self.ttl)
            .await?
        {
            Ok(Some(LockGuard {
                backend: self.backend.clone(),
                lock_key: lock_key.to_string(),
                token,
                contended: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Acquire the lock for `key`, or wait for the current holder to publish.
    ///
    /// Between attempts `probe` is called to look for the holder's value. The
    /// pause doubles from the initial backoff up to the cap, with jitter, and
    /// never extends past the wait budget.
    pub async fn acquire_or_wait<P, Fut>(&self, key: &CacheKey, mut probe: P) -> LockOutcome
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Option<Bytes>>,
    {
        let lock_key = key.lock_key();
        let deadline = Instant::now() + self.max_wait;
        let mut backoff = self.initial_backoff;
        let mut contended = false;

        loop {
            match self.try_acquire(&lock_key).await {
                Ok(Some(mut guard)) => {
                    guard.contended = contended;
                    return LockOutcome::Acquired(guard);
                }
                Ok(None) => {}
                Err(e) => return LockOutcome::Unavailable(e),
            }

            contended = true;
            let now = Instant::now();
            if now >= deadline {
                return LockOutcome::TimedOut;
            }
            tokio::time::sleep(jittered(backoff).min(deadline - now)).await;

            if let Some(value) = probe().await {
                return LockOutcome::Filled(value);
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

/// Between half and all of `base`, so waiters spread out.
fn jittered(base: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    base.mul_f64(factor)
}
