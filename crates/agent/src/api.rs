//! HTTP API for metrics exposition and health checks

use crate::exporter::Exporter;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use stats_lib::{
    health::{ComponentStatus, HealthRegistry},
    ContainerTable,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub exporter: Arc<Exporter>,
    /// Present when the container collector is enabled
    pub table: Option<Arc<ContainerTable>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        exporter: Arc<Exporter>,
        table: Option<Arc<ContainerTable>>,
    ) -> Self {
        Self {
            health_registry,
            exporter,
            table,
        }
    }
}

async fn index() -> Html<&'static str> {
    Html("<a href='/metrics'>metrics</a>")
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        // Collectors keep retrying, so a failed poll is not fatal
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.exporter.render().await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.exporter.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Current container snapshot as JSON
async fn containers(State(state): State<Arc<AppState>>) -> Response {
    match &state.table {
        Some(table) => Json(table.snapshot().await).into_response(),
        None => (StatusCode::NOT_FOUND, "container metrics are disabled").into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .route("/containers", get(containers))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Start the API server
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
