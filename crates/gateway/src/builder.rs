//! Builder for CacheGateway.

use std::sync::Arc;
use std::time::Duration;

use llm_cache_core::{CacheBackend, L2Mode};
use llm_cache_store::LocalCache;

use crate::canonical::KeyCanonicalizer;
use crate::gateway::{CacheGateway, GatewayInner};
use crate::lock::DistributedLock;
use crate::settings::GatewaySettings;
use crate::tier::L2Tier;

const DEFAULT_L1_CAPACITY: usize = 10_000;

/// Builder for constructing a CacheGateway.
pub struct CacheGatewayBuilder {
    settings: GatewaySettings,
    canonicalizer: KeyCanonicalizer,
    l1: Option<Arc<LocalCache>>,
    l1_capacity: usize,
    l2: Option<(Arc<dyn CacheBackend>, L2Mode)>,
    lock_backoff: Option<(Duration, Duration)>,
}

impl CacheGatewayBuilder {
    /// Create a new builder with default settings and no distributed tier.
    pub fn new() -> Self {
        Self {
            settings: GatewaySettings::default(),
            canonicalizer: KeyCanonicalizer::new(),
            l1: None,
            l1_capacity: DEFAULT_L1_CAPACITY,
            l2: None,
            lock_backoff: None,
        }
    }

    pub fn with_settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: KeyCanonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    /// Use an existing L1 cache, e.g. one shared with a sweeper task.
    pub fn with_l1(mut self, l1: Arc<LocalCache>) -> Self {
        self.l1 = Some(l1);
        self
    }

    /// Capacity of the L1 cache created at build time.
    pub fn with_l1_capacity(mut self, max_entries: usize) -> Self {
        self.l1_capacity = max_entries;
        self
    }

    /// Set the distributed tier backend and how it is operated.
    pub fn with_l2(mut self, backend: Arc<dyn CacheBackend>, mode: L2Mode) -> Self {
        self.l2 = Some((backend, mode));
        self
    }

    /// Override the lock retry backoff (initial pause, cap).
    pub fn with_lock_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.lock_backoff = Some((initial, max));
        self
    }

    pub fn build(self) -> CacheGateway {
        let settings = self.settings;
        let l1 = self
            .l1
            .unwrap_or_else(|| Arc::new(LocalCache::new(self.l1_capacity, settings.l1_ttl)));

        let l2 = self
            .l2
            .filter(|(_, mode)| *mode != L2Mode::Disabled)
            .map(|(backend, mode)| Arc::new(L2Tier::new(backend, mode)));

        let lock = l2.as_ref().map(|tier| {
            let lock =
                DistributedLock::new(tier.backend().clone(), settings.lock_ttl, settings.lock_wait);
            match self.lock_backoff {
                Some((initial, max)) => lock.with_backoff(initial, max),
                None => lock,
            }
        });

        CacheGateway::from_inner(GatewayInner::new(
            settings,
            self.canonicalizer,
            l1,
            l2,
            lock,
        ))
    }
}

impl Default for CacheGatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
