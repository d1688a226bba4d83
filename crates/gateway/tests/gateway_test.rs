use bytes::Bytes;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llm_cache_core::{CacheBackend, CachePolicy, CallDescriptor, GatewayStats, L2Mode};
use llm_cache_gateway::{CacheGateway, GatewaySettings, Removal};
use llm_cache_store::InMemoryBackend;

type Compute = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Bytes>> + Send>;

fn extraction_call() -> CallDescriptor {
    CallDescriptor::new("parameter_extraction", "m1")
        .with_message("user", "find errors on 2025-01-01")
        .with_option("temperature", 0.0)
}

fn counted(calls: &Arc<AtomicUsize>, value: &'static str, delay: Duration) -> Compute {
    let calls = calls.clone();
    Box::new(move || {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(Bytes::from_static(value.as_bytes()))
        }
        .boxed()
    })
}

fn failing(calls: &Arc<AtomicUsize>, delay: Duration) -> Compute {
    let calls = calls.clone();
    Box::new(move || {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Err::<Bytes, _>(anyhow::anyhow!("upstream model unavailable"))
        }
        .boxed()
    })
}

fn with_backend(backend: &Arc<InMemoryBackend>, mode: L2Mode) -> CacheGateway {
    CacheGateway::builder()
        .with_l2(backend.clone(), mode)
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_calls_compute_once() {
    let gateway = CacheGateway::builder().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    let pending = (0..20).map(|_| {
        gateway.cached(&call, &policy, counted(&calls, "params", Duration::from_millis(100)))
    });
    let results = join_all(pending).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), Bytes::from_static(b"params"));
    }

    let stats = gateway.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 19);
    assert_eq!(stats.l1_hits, 0);

    // Completed flights are not retained; the next call is a plain L1 hit.
    let again = gateway
        .cached(&call, &policy, counted(&calls, "other", Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(again, Bytes::from_static(b"params"));
    assert_eq!(gateway.stats().l1_hits, 1);
    assert_eq!(gateway.stats_report().await.in_flight, 0);
}

#[tokio::test]
async fn test_parameter_extraction_end_to_end() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let gateway = with_backend(&backend, L2Mode::Forced);
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::default();
    let call = extraction_call();

    // 1. Miss: computed and written to both tiers
    let first = gateway
        .cached(&call, &policy, counted(&calls, r#"{"domain":"payments"}"#, Duration::ZERO))
        .await?;
    assert_eq!(first, Bytes::from_static(br#"{"domain":"payments"}"#));
    let key = gateway.key_for(&call, &policy)?;
    assert!(backend.contains(key.as_str()));

    // 2. Same call with different whitespace: L1 hit
    let spaced = CallDescriptor::new("parameter_extraction", "m1")
        .with_message("user", "find   errors\non 2025-01-01 ")
        .with_option("temperature", 0.0);
    let second = gateway
        .cached(&spaced, &policy, counted(&calls, "unexpected", Duration::ZERO))
        .await?;
    assert_eq!(second, first);

    // 3. L1 lost, L2 still holds the value: L2 hit, L1 repopulated
    gateway.clear_l1();
    assert!(gateway.l1().is_empty());
    let third = gateway
        .cached(&call, &policy, counted(&calls, "unexpected", Duration::ZERO))
        .await?;
    assert_eq!(third, first);
    assert_eq!(gateway.l1().len(), 1);

    // 4. Served from L1 again
    gateway
        .cached(&call, &policy, counted(&calls, "unexpected", Duration::ZERO))
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = gateway.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.l1_hits, 2);
    assert_eq!(stats.l2_hits, 1);
    assert_eq!(stats.backend_errors, 0);

    // The lock was released after the fill.
    assert!(!backend.contains(&key.lock_key()));
    Ok(())
}

#[tokio::test]
async fn test_bypass_touches_nothing() -> anyhow::Result<()> {
    let gateway = CacheGateway::builder().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();

    for _ in 0..2 {
        gateway
            .cached(&call, &CachePolicy::bypass(), counted(&calls, "v", Duration::ZERO))
            .await?;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.stats(), GatewayStats::default());
    assert!(gateway.l1().is_empty());

    // Global switch off behaves the same for default policies.
    let settings = GatewaySettings {
        enabled: false,
        ..GatewaySettings::default()
    };
    let disabled = CacheGateway::builder().with_settings(settings).build();
    for _ in 0..2 {
        disabled
            .cached(&call, &CachePolicy::default(), counted(&calls, "v", Duration::ZERO))
            .await?;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(disabled.stats(), GatewayStats::default());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_distributed_tier_outage_degrades_gracefully() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_reachable(false);
    let gateway = with_backend(&backend, L2Mode::Forced);
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    let pending = (0..20).map(|_| {
        gateway.cached(&call, &policy, counted(&calls, "params", Duration::from_millis(50)))
    });
    for result in join_all(pending).await {
        assert_eq!(result.unwrap(), Bytes::from_static(b"params"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Still answered from L1.
    gateway
        .cached(&call, &policy, counted(&calls, "unexpected", Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = gateway.stats();
    assert_eq!(stats.l1_hits, 1);
    assert!(stats.backend_errors >= 3, "get, lock and set must all be counted");
    assert_eq!(stats.errors, 0);
    // Forced mode keeps trying the tier.
    assert!(gateway.l2_active());
    assert_eq!(gateway.ping().await, Some(false));
}

#[tokio::test]
async fn test_auto_mode_follows_reachability() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_reachable(false);
    let gateway = with_backend(&backend, L2Mode::Auto);
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::default();

    // 1. Unreachable at startup: the tier stays off and is not touched
    assert_eq!(gateway.probe_l2().await, Some(false));
    assert!(!gateway.l2_active());
    let before = backend.calls();
    gateway
        .cached(&extraction_call(), &policy, counted(&calls, "a", Duration::ZERO))
        .await?;
    assert_eq!(backend.calls(), before);
    assert_eq!(gateway.stats().backend_errors, 0);

    // 2. Reachable again: fills reach the tier
    backend.set_reachable(true);
    assert_eq!(gateway.probe_l2().await, Some(true));
    assert!(gateway.l2_active());
    let call = CallDescriptor::new("query_planning", "m1").with_message("user", "plan");
    gateway
        .cached(&call, &policy, counted(&calls, "b", Duration::ZERO))
        .await?;
    assert!(backend.contains(gateway.key_for(&call, &policy)?.as_str()));

    // 3. A failure switches the tier off until the next probe
    backend.set_reachable(false);
    gateway.clear_l1();
    let value = gateway
        .cached(&call, &policy, counted(&calls, "b2", Duration::ZERO))
        .await?;
    assert_eq!(value, Bytes::from_static(b"b2"));
    assert!(!gateway.l2_active());
    assert_eq!(gateway.stats().backend_errors, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_background_probe_re_enables_tier() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_reachable(false);
    let gateway = with_backend(&backend, L2Mode::Auto);
    assert_eq!(gateway.probe_l2().await, Some(false));

    let probe = gateway
        .spawn_l2_probe(Duration::from_secs(30))
        .expect("auto mode has a probe");
    backend.set_reachable(true);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(gateway.l2_active());
    probe.abort();

    // Forced and L1-only gateways have nothing to probe.
    assert!(with_backend(&backend, L2Mode::Forced)
        .spawn_l2_probe(Duration::from_secs(30))
        .is_none());
    assert!(CacheGateway::builder()
        .build()
        .spawn_l2_probe(Duration::from_secs(30))
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_zero_intervals_disable_background_tasks() {
    let backend = Arc::new(InMemoryBackend::new());
    let gateway = with_backend(&backend, L2Mode::Auto);
    let pings_before = backend.calls();

    assert!(gateway.spawn_l2_probe(Duration::ZERO).is_none());
    assert!(gateway.spawn_l1_sweeper(Duration::ZERO).is_none());

    gateway.l1().put("stale", Bytes::from_static(b"v"), Some(Duration::from_millis(10)));
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Nothing pinged the backend and nothing swept the expired entry.
    assert_eq!(backend.calls(), pings_before);
    assert_eq!(gateway.l1().len(), 1);

    let sweeper = gateway
        .spawn_l1_sweeper(Duration::from_secs(1))
        .expect("non-zero interval spawns a sweeper");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(gateway.l1().is_empty());
    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_compute_error_reaches_every_waiter_and_is_not_cached() {
    let gateway = CacheGateway::builder().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    let pending = (0..5).map(|_| gateway.cached(&call, &policy, failing(&calls, Duration::from_millis(20))));
    for result in join_all(pending).await {
        let err = result.unwrap_err();
        assert!(err.is_compute());
        assert!(err.to_string().contains("upstream model unavailable"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.stats().errors, 1);
    assert_eq!(gateway.stats().coalesced, 4);
    assert!(gateway.l1().is_empty());

    // Nothing was cached, so the next call computes again.
    let value = gateway
        .cached(&call, &policy, counted(&calls, "recovered", Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(value, Bytes::from_static(b"recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_two_gateways_share_one_fill() {
    // Two processes pointed at the same distributed tier.
    let backend = Arc::new(InMemoryBackend::new());
    let a = with_backend(&backend, L2Mode::Forced);
    let b = with_backend(&backend, L2Mode::Forced);
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    let first = a.cached(&call, &policy, counted(&calls, "shared", Duration::from_millis(200)));
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.cached(&call, &policy, counted(&calls, "duplicate", Duration::from_millis(200)))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), Bytes::from_static(b"shared"));
    assert_eq!(second.unwrap(), Bytes::from_static(b"shared"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.stats().misses, 1);
    assert_eq!(b.stats().misses, 0);
    assert_eq!(b.stats().l2_hits, 1);
    // b promoted the value it waited for.
    assert_eq!(b.l1().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_wait_is_bounded() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let settings = GatewaySettings {
        lock_wait: Duration::from_millis(300),
        ..GatewaySettings::default()
    };
    let gateway = CacheGateway::builder()
        .with_settings(settings)
        .with_l2(backend.clone(), L2Mode::Forced)
        .build();
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    // A holder that never publishes.
    let key = gateway.key_for(&call, &policy)?;
    backend
        .try_acquire_lock(&key.lock_key(), "stuck-holder", Duration::from_secs(60))
        .await?;

    let started = tokio::time::Instant::now();
    let value = gateway
        .cached(&call, &policy, counted(&calls, "computed", Duration::ZERO))
        .await?;
    assert_eq!(value, Bytes::from_static(b"computed"));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(gateway.stats().lock_timeouts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The foreign lock is untouched.
    assert!(backend.contains(&key.lock_key()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_max_age_and_policy_ttl() -> anyhow::Result<()> {
    let gateway = CacheGateway::builder().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();

    gateway
        .cached(&call, &CachePolicy::default(), counted(&calls, "v1", Duration::ZERO))
        .await?;
    tokio::time::advance(Duration::from_secs(10)).await;

    // Too old for this caller.
    let strict = CachePolicy::default().with_max_age_seconds(5);
    let value = gateway
        .cached(&call, &strict, counted(&calls, "v2", Duration::ZERO))
        .await?;
    assert_eq!(value, Bytes::from_static(b"v2"));

    // Fresh enough for a lenient caller.
    let lenient = CachePolicy::default().with_max_age_seconds(60);
    let value = gateway
        .cached(&call, &lenient, counted(&calls, "v3", Duration::ZERO))
        .await?;
    assert_eq!(value, Bytes::from_static(b"v2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // A short policy TTL expires the entry.
    let short = CachePolicy::default().with_ttl_seconds(1);
    let other = CallDescriptor::new("chat", "m1").with_message("user", "hi");
    gateway
        .cached(&other, &short, counted(&calls, "t1", Duration::ZERO))
        .await?;
    tokio::time::advance(Duration::from_secs(2)).await;
    let value = gateway
        .cached(&other, &short, counted(&calls, "t2", Duration::ZERO))
        .await?;
    assert_eq!(value, Bytes::from_static(b"t2"));
    Ok(())
}

#[tokio::test]
async fn test_no_cache_and_no_store() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let gateway = with_backend(&backend, L2Mode::Forced);
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    gateway
        .cached(&call, &policy, counted(&calls, "old", Duration::ZERO))
        .await?;

    // no_cache recomputes and refreshes both tiers.
    let refreshed = gateway
        .cached(&call, &CachePolicy::refresh(), counted(&calls, "new", Duration::ZERO))
        .await?;
    assert_eq!(refreshed, Bytes::from_static(b"new"));
    gateway.clear_l1();
    let value = gateway
        .cached(&call, &policy, counted(&calls, "unexpected", Duration::ZERO))
        .await?;
    assert_eq!(value, Bytes::from_static(b"new"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // no_store computes without writing anything.
    let other = CallDescriptor::new("chat", "m1").with_message("user", "hello");
    let no_store = CachePolicy::default().with_no_store();
    gateway
        .cached(&other, &no_store, counted(&calls, "x", Duration::ZERO))
        .await?;
    assert!(!backend.contains(gateway.key_for(&other, &policy)?.as_str()));
    gateway
        .cached(&other, &policy, counted(&calls, "y", Duration::ZERO))
        .await?;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_across_gateways_compute_once() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let a = with_backend(&backend, L2Mode::Forced);
    let b = with_backend(&backend, L2Mode::Forced);
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();

    a.cached(&call, &CachePolicy::default(), counted(&calls, "old", Duration::ZERO))
        .await?;

    let refresh = CachePolicy::refresh();
    let first = a.cached(&call, &refresh, counted(&calls, "fresh", Duration::from_millis(200)));
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.cached(&call, &refresh, counted(&calls, "duplicate", Duration::from_millis(200)))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    // b waited on a's lock and took a's value, never the stale one.
    assert_eq!(first?, Bytes::from_static(b"fresh"));
    assert_eq!(second?, Bytes::from_static(b"fresh"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(b.stats().misses, 0);
    assert_eq!(b.stats().l2_hits, 1);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ExtractedParams {
    domain: String,
    date: String,
}

#[tokio::test]
async fn test_typed_values_and_corrupt_entries() -> anyhow::Result<()> {
    let gateway = CacheGateway::builder().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    let extract = |calls: &Arc<AtomicUsize>| {
        let calls = calls.clone();
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(ExtractedParams {
                domain: "payments".into(),
                date: "2025-01-01".into(),
            })
        }
    };

    let first: ExtractedParams = gateway.cached_json(&call, &policy, extract(&calls)).await?;
    let second: ExtractedParams = gateway.cached_json(&call, &policy, extract(&calls)).await?;
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Bytes that do not decode as the requested type read as a miss.
    let key = gateway.key_for(&call, &policy)?;
    gateway
        .l1()
        .put(key.as_str(), Bytes::from_static(b"not json"), None);
    let third: ExtractedParams = gateway.cached_json(&call, &policy, extract(&calls)).await?;
    assert_eq!(third, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.stats().serialization_errors, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalidate_and_report() -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let gateway = with_backend(&backend, L2Mode::Forced);
    let calls = Arc::new(AtomicUsize::new(0));
    let call = extraction_call();
    let policy = CachePolicy::default();

    gateway
        .cached(&call, &policy, counted(&calls, "v", Duration::ZERO))
        .await?;

    let report = gateway.stats_report().await;
    assert_eq!(report.l1.entries, 1);
    assert_eq!(report.l2.mode, L2Mode::Forced);
    assert!(report.l2.active);
    assert_eq!(report.l2.backend.as_deref(), Some("memory"));
    assert_eq!(report.l2.entries, Some(1));

    let removal = gateway.invalidate(&call, &policy).await?;
    assert_eq!(removal, Removal { l1: true, l2: true });
    assert_eq!(backend.approximate_len().await?, Some(0));

    gateway
        .cached(&call, &policy, counted(&calls, "v", Duration::ZERO))
        .await?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Namespaces are isolated.
    let tenant = CachePolicy::default().with_namespace("tenant-b");
    assert_ne!(gateway.key_for(&call, &tenant)?, gateway.key_for(&call, &policy)?);
    Ok(())
}
