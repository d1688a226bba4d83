use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call cache policy supplied by the caller. Never persisted.
///
/// Every omitted field falls back to the gateway default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// `false` bypasses the gateway entirely for this call.
    pub enabled: bool,
    /// Skip reads and force recomputation. Writes still happen unless `no_store`.
    pub no_cache: bool,
    /// Skip writes.
    pub no_store: bool,
    /// Override the TTL for this call.
    pub ttl_seconds: Option<u64>,
    /// Reject a cached hit older than this, even if not yet expired.
    pub max_age_seconds: Option<u64>,
    /// Override the namespace.
    pub namespace: Option<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            no_cache: false,
            no_store: false,
            ttl_seconds: None,
            max_age_seconds: None,
            namespace: None,
        }
    }
}

impl CachePolicy {
    /// Policy that bypasses caching.
    pub fn bypass() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Policy that forces recomputation and refreshes the cache.
    pub fn refresh() -> Self {
        Self {
            no_cache: true,
            ..Self::default()
        }
    }

    pub fn with_ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = Some(ttl);
        self
    }

    pub fn with_max_age_seconds(mut self, max_age: u64) -> Self {
        self.max_age_seconds = Some(max_age);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }

    /// Whether a hit of the given age is acceptable under `max_age_seconds`.
    pub fn accepts_age(&self, age: Duration) -> bool {
        self.max_age_seconds
            .map_or(true, |max| age <= Duration::from_secs(max))
    }
}
