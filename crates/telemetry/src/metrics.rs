//! Metrics implementation using Prometheus.

use llm_cache_core::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// How a gateway call was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    L1Hit,
    L2Hit,
    Miss,
    Coalesced,
    Bypass,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1Hit => "l1_hit",
            Self::L2Hit => "l2_hit",
            Self::Miss => "miss",
            Self::Coalesced => "coalesced",
            Self::Bypass => "bypass",
        }
    }
}

/// Count one gateway lookup.
pub fn track_lookup(cache_type: &str, outcome: LookupOutcome) {
    metrics::counter!(
        "llm_cache_lookups_total",
        "cache_type" => cache_type.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record one compute invocation.
pub fn track_compute(cache_type: &str, latency_sec: f64, success: bool) {
    metrics::histogram!("llm_cache_compute_seconds", "cache_type" => cache_type.to_string())
        .record(latency_sec);
    if !success {
        metrics::counter!("llm_cache_compute_errors_total", "cache_type" => cache_type.to_string())
            .increment(1);
    }
}

/// Count a failed distributed-tier operation.
pub fn track_backend_failure(op: &'static str) {
    metrics::counter!("llm_cache_backend_failures_total", "op" => op).increment(1);
}
