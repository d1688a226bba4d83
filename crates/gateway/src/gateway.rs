//! Cache-aside orchestration around a single compute call.
//!
//! A lookup walks L1, then the distributed tier. On a miss the call joins or
//! starts the in-process flight for its key; the flight leader takes the
//! distributed lock (when a distributed tier is active), re-checks, computes
//! once, and publishes to both tiers. Cache-layer failures never fail a call:
//! they degrade to computing without the cache.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use llm_cache_core::{
    config::CacheConfig, CacheKey, CachePolicy, CallDescriptor, Codec, Error, GatewayStats,
    JsonCodec, L2Mode, Result,
};
use llm_cache_store::{LocalCache, LocalCacheStats, RedisCacheBackend};
use llm_cache_telemetry::{track_compute, track_lookup, LookupOutcome};

use crate::builder::CacheGatewayBuilder;
use crate::canonical::KeyCanonicalizer;
use crate::lock::{DistributedLock, LockGuard, LockOutcome};
use crate::settings::GatewaySettings;
use crate::single_flight::SingleFlight;
use crate::tier::L2Tier;

/// Decides whether cached bytes are usable by the current caller.
type Acceptor = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

fn accept_any() -> Acceptor {
    Arc::new(|_: &[u8]| true)
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    errors: AtomicU64,
    serialization_errors: AtomicU64,
    lock_timeouts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State of the distributed tier as reported by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct L2Status {
    pub mode: L2Mode,
    pub active: bool,
    pub backend: Option<String>,
    pub entries: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub counters: GatewayStats,
    pub l1: LocalCacheStats,
    pub l2: L2Status,
    pub in_flight: usize,
}

/// Which tiers held a removed key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub l1: bool,
    pub l2: bool,
}

pub(crate) struct GatewayInner {
    pub(crate) settings: GatewaySettings,
    pub(crate) canonicalizer: KeyCanonicalizer,
    pub(crate) l1: Arc<LocalCache>,
    pub(crate) l2: Option<Arc<L2Tier>>,
    pub(crate) lock: Option<DistributedLock>,
    pub(crate) flights: SingleFlight<Result<Bytes>>,
    counters: Counters,
}

impl GatewayInner {
    pub(crate) fn new(
        settings: GatewaySettings,
        canonicalizer: KeyCanonicalizer,
        l1: Arc<LocalCache>,
        l2: Option<Arc<L2Tier>>,
        lock: Option<DistributedLock>,
    ) -> Self {
        Self {
            settings,
            canonicalizer,
            l1,
            l2,
            lock,
            flights: SingleFlight::new(),
            counters: Counters::default(),
        }
    }
}

/// Two-tier response cache with request coalescing.
///
/// Cheap to clone; clones share tiers, flights and counters.
#[derive(Clone)]
pub struct CacheGateway {
    inner: Arc<GatewayInner>,
}

impl CacheGateway {
    pub fn builder() -> CacheGatewayBuilder {
        CacheGatewayBuilder::new()
    }

    pub(crate) fn from_inner(inner: GatewayInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Build a gateway from configuration, connecting the distributed tier
    /// when one is configured and probing it once.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let mut builder = Self::builder()
            .with_settings(GatewaySettings::from(config))
            .with_l1(Arc::new(LocalCache::new(config.l1_max_entries, config.l1_ttl())));

        let mode = config.l2_mode();
        if let (L2Mode::Forced | L2Mode::Auto, Some(url)) = (mode, config.redis_url()) {
            match RedisCacheBackend::new(url, &config.key_prefix, config.l2_timeout()) {
                Ok(backend) => builder = builder.with_l2(Arc::new(backend), mode),
                Err(e) => tracing::warn!(error = %e, "Distributed cache unavailable, running with L1 only"),
            }
        }

        let gateway = builder.build();
        if let Some(l2) = &gateway.inner.l2 {
            let reachable = l2.probe().await;
            tracing::info!(mode = %mode, reachable = reachable, "Distributed cache configured");
        } else {
            tracing::info!("Running with L1 only");
        }
        gateway
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.inner.settings
    }

    pub fn l1(&self) -> &Arc<LocalCache> {
        &self.inner.l1
    }

    fn active_l2(&self) -> Option<&Arc<L2Tier>> {
        self.inner.l2.as_ref().filter(|l2| l2.is_active())
    }

    /// Cache key a call would use, after filling in configured defaults.
    pub fn key_for(&self, descriptor: &CallDescriptor, policy: &CachePolicy) -> Result<CacheKey> {
        let resolved = self.inner.settings.resolve(descriptor, policy);
        self.inner.canonicalizer.canonicalize(&resolved)
    }

    /// Return the cached bytes for `descriptor`, computing them at most once
    /// per key across concurrent callers.
    ///
    /// Compute errors are returned as [`Error::Compute`] to every caller that
    /// waited on that computation and are never cached.
    pub async fn cached<F, Fut>(
        &self,
        descriptor: &CallDescriptor,
        policy: &CachePolicy,
        compute: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        let start = move || -> BoxFuture<'static, Result<Bytes>> {
            async move { compute().await.map_err(Error::compute) }.boxed()
        };
        self.serve(descriptor, policy, accept_any(), start).await
    }

    /// Like [`cached`](Self::cached) for typed values stored through `codec`.
    ///
    /// Cached bytes the codec cannot decode are treated as a miss.
    pub async fn cached_with<T, C, F, Fut>(
        &self,
        codec: C,
        descriptor: &CallDescriptor,
        policy: &CachePolicy,
        compute: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        C: Codec<T> + Clone + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let probe_codec = codec.clone();
        let accept: Acceptor = Arc::new(move |raw: &[u8]| probe_codec.decode(raw).is_ok());

        let encode_codec = codec.clone();
        let start = move || -> BoxFuture<'static, Result<Bytes>> {
            async move {
                let value = compute().await.map_err(Error::compute)?;
                encode_codec.encode(&value)
            }
            .boxed()
        };

        let raw = self.serve(descriptor, policy, accept, start).await?;
        codec.decode(&raw)
    }

    /// [`cached_with`](Self::cached_with) using JSON.
    pub async fn cached_json<T, F, Fut>(
        &self,
        descriptor: &CallDescriptor,
        policy: &CachePolicy,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.cached_with(JsonCodec, descriptor, policy, compute).await
    }

    async fn serve<S>(
        &self,
        descriptor: &CallDescriptor,
        policy: &CachePolicy,
        accept: Acceptor,
        start: S,
    ) -> Result<Bytes>
    where
        S: FnOnce() -> BoxFuture<'static, Result<Bytes>> + Send + 'static,
    {
        let cache_type = descriptor.cache_type.as_str();

        if !self.inner.settings.enabled || !policy.enabled {
            track_lookup(cache_type, LookupOutcome::Bypass);
            return start().await;
        }

        let key = match self.key_for(descriptor, policy) {
            Ok(key) => key,
            Err(e) => {
                bump(&self.inner.counters.serialization_errors);
                tracing::warn!(cache_type = cache_type, error = %e, "Could not derive cache key, computing uncached");
                return start().await;
            }
        };

        if !policy.no_cache {
            if let Some(value) = self.read_l1(&key, policy, &accept) {
                self.record_hit(cache_type, LookupOutcome::L1Hit);
                return Ok(value);
            }
            if let Some(value) = self.read_l2(&key, cache_type, policy, &accept).await {
                self.record_hit(cache_type, LookupOutcome::L2Hit);
                return Ok(value);
            }
        }

        let episode = Episode {
            gateway: self.clone(),
            key: key.clone(),
            cache_type: cache_type.to_string(),
            policy: policy.clone(),
            accept,
        };
        let flight = self
            .inner
            .flights
            .run(key.as_str(), move || episode.run(start).boxed())
            .await;

        if flight.coalesced {
            bump(&self.inner.counters.coalesced);
            track_lookup(cache_type, LookupOutcome::Coalesced);
            tracing::debug!(cache_type = cache_type, key = %key, "Joined in-flight computation");
        }
        flight.value.unwrap_or_else(|e| {
            bump(&self.inner.counters.errors);
            tracing::error!(cache_type = cache_type, key = %key, error = %e, "Cache fill aborted");
            Err(Error::internal(e.to_string()))
        })
    }

    fn record_hit(&self, cache_type: &str, outcome: LookupOutcome) {
        match outcome {
            LookupOutcome::L1Hit => bump(&self.inner.counters.l1_hits),
            LookupOutcome::L2Hit => bump(&self.inner.counters.l2_hits),
            _ => {}
        }
        track_lookup(cache_type, outcome);
    }

    fn read_l1(&self, key: &CacheKey, policy: &CachePolicy, accept: &Acceptor) -> Option<Bytes> {
        let hit = self.inner.l1.get(key.as_str())?;
        if !policy.accepts_age(hit.age) {
            tracing::debug!(key = %key, age_ms = hit.age.as_millis() as u64, "L1 entry older than max_age");
            return None;
        }
        if !accept(&hit.value) {
            bump(&self.inner.counters.serialization_errors);
            self.inner.l1.remove(key.as_str());
            tracing::warn!(key = %key, "Discarding undecodable L1 entry");
            return None;
        }
        Some(hit.value)
    }

    /// Distributed lookup; a usable hit is promoted into L1 with its age kept.
    async fn read_l2(
        &self,
        key: &CacheKey,
        cache_type: &str,
        policy: &CachePolicy,
        accept: &Acceptor,
    ) -> Option<Bytes> {
        let l2 = self.active_l2()?;
        let entry = l2.get(key).await?;

        let age = entry.age();
        if !policy.accepts_age(age) {
            tracing::debug!(key = %key, age_ms = age.as_millis() as u64, "Distributed entry older than max_age");
            return None;
        }
        if !accept(&entry.value) {
            bump(&self.inner.counters.serialization_errors);
            tracing::warn!(key = %key, "Discarding undecodable distributed entry");
            return None;
        }

        let ttl = self
            .inner
            .settings
            .l1_ttl_for(cache_type, policy)
            .min(entry.remaining());
        self.inner
            .l1
            .put_with_age(key.as_str(), entry.value.clone(), ttl, age);
        Some(entry.value)
    }

    async fn store(&self, key: &CacheKey, cache_type: &str, policy: &CachePolicy, value: Bytes) {
        let settings = &self.inner.settings;
        self.inner.l1.put(
            key.as_str(),
            value.clone(),
            Some(settings.l1_ttl_for(cache_type, policy)),
        );

        if let Some(l2) = self.active_l2() {
            l2.put(key, value, settings.effective_ttl(cache_type, policy))
                .await;
        }
    }

    async fn release(&self, guard: LockGuard) {
        match guard.release().await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Lock had already expired or changed hands"),
            Err(e) => {
                if let Some(l2) = &self.inner.l2 {
                    l2.record_failure("lock_release", &e);
                }
            }
        }
    }

    /// Drop a key from both tiers.
    pub async fn remove(&self, key: &CacheKey) -> Removal {
        let l1 = self.inner.l1.remove(key.as_str());
        let l2 = match self.active_l2() {
            Some(l2) => l2.delete(key).await,
            None => false,
        };
        tracing::info!(key = %key, l1 = l1, l2 = l2, "Removed cache key");
        Removal { l1, l2 }
    }

    /// Drop the entry a call would hit.
    pub async fn invalidate(
        &self,
        descriptor: &CallDescriptor,
        policy: &CachePolicy,
    ) -> Result<Removal> {
        let key = self.key_for(descriptor, policy)?;
        Ok(self.remove(&key).await)
    }

    pub fn clear_l1(&self) {
        self.inner.l1.clear();
        tracing::info!("Cleared L1 cache");
    }

    /// Reachability of the distributed tier; `None` when none is configured.
    pub async fn ping(&self) -> Option<bool> {
        match &self.inner.l2 {
            Some(l2) => Some(l2.ping().await),
            None => None,
        }
    }

    /// Probe the distributed tier, switching it on or off in auto mode.
    pub async fn probe_l2(&self) -> Option<bool> {
        match &self.inner.l2 {
            Some(l2) => Some(l2.probe().await),
            None => None,
        }
    }

    /// Whether lookups currently use the distributed tier.
    pub fn l2_active(&self) -> bool {
        self.active_l2().is_some()
    }

    pub fn stats(&self) -> GatewayStats {
        let c = &self.inner.counters;
        let (backend_errors, l2_serialization_errors) = self
            .inner
            .l2
            .as_ref()
            .map_or((0, 0), |l2| (l2.failures(), l2.decode_failures()));

        GatewayStats {
            l1_hits: c.l1_hits.load(Ordering::Relaxed),
            l2_hits: c.l2_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            backend_errors,
            serialization_errors: c.serialization_errors.load(Ordering::Relaxed)
                + l2_serialization_errors,
            lock_timeouts: c.lock_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Counters plus the state of both tiers.
    pub async fn stats_report(&self) -> StatsReport {
        let l2 = match &self.inner.l2 {
            Some(l2) => L2Status {
                mode: l2.mode(),
                active: l2.is_active(),
                backend: Some(l2.backend().name().to_string()),
                entries: if l2.is_active() { l2.len().await } else { None },
            },
            None => L2Status {
                mode: L2Mode::Disabled,
                active: false,
                backend: None,
                entries: None,
            },
        };

        StatsReport {
            counters: self.stats(),
            l1: self.inner.l1.stats(),
            l2,
            in_flight: self.inner.flights.in_flight(),
        }
    }

    /// Periodically purge expired L1 entries. A zero interval disables the
    /// sweeper and returns `None`.
    pub fn spawn_l1_sweeper(&self, every: Duration) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            tracing::debug!("L1 sweeper disabled");
            return None;
        }
        Some(self.inner.l1.spawn_sweeper(every))
    }

    /// Periodically re-probe an auto-mode distributed tier. Returns `None`
    /// when there is nothing to probe or the interval is zero.
    pub fn spawn_l2_probe(&self, every: Duration) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            tracing::debug!("Distributed tier re-probing disabled");
            return None;
        }
        let l2 = self
            .inner
            .l2
            .as_ref()
            .filter(|l2| l2.mode() == L2Mode::Auto)?;
        let tier = Arc::downgrade(l2);
        let every = every.max(Duration::from_millis(10));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tier) = tier.upgrade() else {
                    break;
                };
                tier.probe().await;
            }
        }))
    }
}

/// One computation of a key, run by the flight leader.
struct Episode {
    gateway: CacheGateway,
    key: CacheKey,
    cache_type: String,
    policy: CachePolicy,
    accept: Acceptor,
}

impl Episode {
    #[tracing::instrument(
        name = "cache_fill",
        skip_all,
        fields(cache_type = %self.cache_type, key = %self.key)
    )]
    async fn run<S>(self, start: S) -> Result<Bytes>
    where
        S: FnOnce() -> BoxFuture<'static, Result<Bytes>> + Send,
    {
        let gateway = &self.gateway;
        let counters = &gateway.inner.counters;
        let key = &self.key;
        let cache_type = self.cache_type.as_str();
        let policy = &self.policy;
        let accept = &self.accept;

        // A previous flight may have published between our miss and now.
        if !policy.no_cache {
            if let Some(value) = gateway.read_l1(key, policy, accept) {
                gateway.record_hit(cache_type, LookupOutcome::L1Hit);
                return Ok(value);
            }
        }

        let mut guard = None;
        if let (Some(lock), Some(l2)) = (&gateway.inner.lock, gateway.active_l2()) {
            // A refresh must not serve what was cached before it started, so it
            // only reuses a value once a holder it waited on has released.
            let outcome = if policy.no_cache {
                lock.acquire_or_wait(key, || std::future::ready(None)).await
            } else {
                lock.acquire_or_wait(key, move || gateway.read_l2(key, cache_type, policy, accept))
                    .await
            };
            match outcome {
                LockOutcome::Acquired(held) => {
                    if !policy.no_cache || held.contended() {
                        if let Some(value) = gateway.read_l2(key, cache_type, policy, accept).await {
                            gateway.release(held).await;
                            gateway.record_hit(cache_type, LookupOutcome::L2Hit);
                            return Ok(value);
                        }
                    }
                    guard = Some(held);
                }
                LockOutcome::Filled(value) => {
                    gateway.record_hit(cache_type, LookupOutcome::L2Hit);
                    return Ok(value);
                }
                LockOutcome::TimedOut => {
                    bump(&counters.lock_timeouts);
                    tracing::warn!("Lock wait budget exhausted, computing without the lock");
                }
                LockOutcome::Unavailable(e) => l2.record_failure("lock", &e),
            }
        }

        bump(&counters.misses);
        track_lookup(cache_type, LookupOutcome::Miss);

        let started = Instant::now();
        let result = start().await;
        track_compute(cache_type, started.elapsed().as_secs_f64(), result.is_ok());

        match &result {
            Ok(value) if policy.no_store => {
                tracing::debug!(bytes = value.len(), "Computed, not stored (no_store)");
            }
            Ok(value) => {
                gateway.store(key, cache_type, policy, value.clone()).await;
                tracing::debug!(bytes = value.len(), "Computed and stored");
            }
            Err(e) if e.is_compute() => {
                bump(&counters.errors);
                tracing::warn!(error = %e, "Compute failed, nothing cached");
            }
            Err(e) => {
                bump(&counters.serialization_errors);
                tracing::warn!(error = %e, "Computed value could not be encoded, nothing cached");
            }
        }

        if let Some(held) = guard {
            gateway.release(held).await;
        }
        result
    }
}
