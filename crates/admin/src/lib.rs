//! Admin API for the LLM cache gateway.
//!
//! Provides endpoints for:
//! - Health and distributed-tier reachability
//! - Gateway counters and tier sizes
//! - Prometheus metrics
//! - Key removal and L1 clearing

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use llm_cache_core::CacheKey;
use llm_cache_gateway::{CacheGateway, Removal, StatsReport};

/// Admin API state.
pub struct AdminState {
    pub gateway: CacheGateway,
    pub metrics: Option<PrometheusHandle>,
    /// Bearer token required on every route except `/health`. `None` leaves
    /// the surface open.
    pub admin_token: Option<Secret<String>>,
}

impl AdminState {
    pub fn new(gateway: CacheGateway) -> Self {
        Self {
            gateway,
            metrics: None,
            admin_token: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_admin_token(mut self, token: Option<Secret<String>>) -> Self {
        self.admin_token = token;
        self
    }
}

/// Response for the ping endpoint.
#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub l2_configured: bool,
    pub reachable: bool,
    pub active: bool,
}

/// Authentication middleware.
async fn auth_middleware(
    State(state): State<Arc<AdminState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = &state.admin_token else {
        return Ok(next.run(req).await);
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected.expose_secret().as_str() => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("Rejected admin request with invalid token");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Health check endpoint (public).
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Distributed-tier reachability.
async fn ping(State(state): State<Arc<AdminState>>) -> Json<PingResponse> {
    let reachable = state.gateway.ping().await;
    Json(PingResponse {
        l2_configured: reachable.is_some(),
        reachable: reachable.unwrap_or(false),
        active: state.gateway.l2_active(),
    })
}

async fn stats(State(state): State<Arc<AdminState>>) -> Json<StatsReport> {
    Json(state.gateway.stats_report().await)
}

/// Prometheus text exposition.
async fn get_metrics(State(state): State<Arc<AdminState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

async fn delete_key(
    State(state): State<Arc<AdminState>>,
    Path(key): Path<String>,
) -> Json<Removal> {
    Json(state.gateway.remove(&CacheKey::from_raw(key)).await)
}

async fn clear_l1(State(state): State<Arc<AdminState>>) -> StatusCode {
    state.gateway.clear_l1();
    StatusCode::NO_CONTENT
}

/// Build the admin API router.
pub fn admin_router(state: Arc<AdminState>) -> Router {
    let api_routes = Router::new()
        .route("/ping", get(ping))
        .route("/stats", get(stats))
        .route("/metrics", get(get_metrics))
        .route("/keys/:key", delete(delete_key))
        .route("/l1/clear", post(clear_l1))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(api_routes)
        .route("/health", get(health)) // Public health check
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
