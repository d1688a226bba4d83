//! Observability for the LLM cache gateway.
//!
//! This crate provides:
//! - Log/trace subscriber setup (stdout, optional JSON, optional OTLP export)
//! - Prometheus recorder setup and cache metric helpers

pub mod metrics;
pub mod tracing_layer;

pub use self::metrics::{
    setup_metrics_recorder, track_backend_failure, track_compute, track_lookup, LookupOutcome,
};
pub use self::tracing_layer::configure_tracing;
