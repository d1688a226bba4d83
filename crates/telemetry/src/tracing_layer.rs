//! Distributed tracing configuration.

use llm_cache_core::{Error, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Configure stdout logging and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set,
/// OpenTelemetry export.
///
/// `json` switches the stdout layer to one JSON object per event.
pub fn configure_tracing(json: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,llm_cache=debug".into()),
    );

    // Exactly one of these is Some.
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(
                sdktrace::config().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    "llm-cache-gateway",
                )])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::internal(format!("Failed to install OTLP pipeline: {}", e)))?;
        let tracer = provider.tracer("llm-cache-gateway");

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
    }

    Ok(())
}
