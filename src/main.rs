//! LLM cache gateway service.
//!
//! Builds the two-tier response cache from configuration, keeps it maintained
//! in the background, and serves the admin surface over HTTP.

use std::sync::Arc;
use std::time::Duration;

use llm_cache_admin::{admin_router, AdminState};
use llm_cache_core::config::CacheConfig;
use llm_cache_gateway::CacheGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CacheConfig::load()?;

    // Initialize tracing
    llm_cache_telemetry::configure_tracing(config.log_json)?;

    tracing::info!("Starting llm-cache-gateway v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Cache tiers
    // =========================================================================
    let gateway = CacheGateway::from_config(&config).await;
    tracing::info!(
        enabled = config.enabled,
        namespace = %config.namespace,
        l1_max_entries = config.l1_max_entries,
        l2_mode = %config.l2_mode(),
        "Cache gateway initialized"
    );

    // A zero interval leaves the task unspawned.
    let _sweeper =
        gateway.spawn_l1_sweeper(Duration::from_secs(config.l1_sweep_interval_seconds));
    let _probe =
        gateway.spawn_l2_probe(Duration::from_secs(config.l2_probe_interval_seconds));

    // =========================================================================
    // Observability
    // =========================================================================
    let metrics_handle = llm_cache_telemetry::setup_metrics_recorder()?;

    if config.admin_token.is_none() {
        tracing::warn!("LLM_CACHE_ADMIN_TOKEN not set - admin routes are unauthenticated");
    }

    let admin_state = AdminState::new(gateway)
        .with_metrics(metrics_handle)
        .with_admin_token(config.admin_token.clone());

    // =========================================================================
    // Start the admin server
    // =========================================================================
    let addr = format!("{}:{}", config.admin_host, config.admin_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Admin server starting");

    axum::serve(listener, admin_router(Arc::new(admin_state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Admin server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
