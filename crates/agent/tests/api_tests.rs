//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use stats_agent::{
    api::{create_router, AppState},
    exporter::Exporter,
};
use stats_lib::{
    collector::ContainerTable,
    health::{components, HealthRegistry},
    observability::CollectorMetrics,
    ContainerRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

fn record(id: &str, service: &str) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        up: true,
        mem_used: 2048,
        mem_total: 8192,
        cpu_used: 0.25,
        labels: vec![service.to_string()],
        expires_at: Utc::now() + Duration::minutes(5),
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTAINER_COLLECTOR).await;
    health_registry.register(components::PROCESS_COUNTER).await;

    let table = Arc::new(ContainerTable::new());
    let records: HashMap<String, ContainerRecord> = [
        record("aaaaaaaa11111111", "web"),
        record("bbbbbbbb22222222", "db"),
    ]
    .into_iter()
    .map(|r| (r.id.clone(), r))
    .collect();
    table.commit(records).await;

    let exporter = Exporter::new("0.1.0")
        .unwrap()
        .with_containers(table.clone(), &["com.docker.compose.service".to_string()])
        .unwrap();

    let state = Arc::new(AppState::new(
        health_registry,
        Arc::new(exporter),
        Some(table),
    ));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_index_links_to_metrics() {
    let (app, _state) = setup_test_app().await;

    let response = get(app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/html"));
    assert!(body_text(response).await.contains("href='/metrics'"));
}

#[tokio::test]
async fn test_metrics_endpoint_returns_container_series() {
    let (app, _state) = setup_test_app().await;

    let response = get(app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let text = body_text(response).await;
    assert!(text.contains("docker_up{com_docker_compose_service=\"web\",id=\"aaaaaaaa\"} 1"));
    assert!(text.contains(
        "docker_mem_used{com_docker_compose_service=\"db\",id=\"bbbbbbbb\"} 2048"
    ));
    assert!(text.contains(
        "docker_mem_total{com_docker_compose_service=\"db\",id=\"bbbbbbbb\"} 8192"
    ));
    assert!(text.contains(
        "docker_cpu_used{com_docker_compose_service=\"web\",id=\"aaaaaaaa\"} 0.25"
    ));
    assert!(text.contains("docker_stats_version{version=\"0.1.0\"} 1"));
    assert!(text.contains("docker_stats_uptime"));
}

#[tokio::test]
async fn test_metrics_includes_self_metrics() {
    let (app, _state) = setup_test_app().await;

    let metrics = CollectorMetrics::new();
    metrics.observe_tick_duration(0.02);
    metrics.inc_list_failures();

    let text = body_text(get(app, "/metrics").await).await;
    assert!(text.contains("stats_agent_tick_duration_seconds_bucket"));
    assert!(text.contains("stats_agent_tick_duration_seconds_count"));
    assert!(text.contains("stats_agent_list_failures_total"));
}

#[tokio::test]
async fn test_containers_endpoint_returns_snapshot() {
    let (app, _state) = setup_test_app().await;

    let response = get(app, "/containers").await;
    assert_eq!(response.status(), StatusCode::OK);

    let containers = body_json(response).await;
    let containers = containers.as_array().unwrap();
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0]["id"], "aaaaaaaa11111111");
    assert_eq!(containers[0]["labels"][0], "web");
    assert_eq!(containers[1]["mem_total"], 8192);
}

#[tokio::test]
async fn test_containers_endpoint_disabled() {
    let state = Arc::new(AppState::new(
        HealthRegistry::new(),
        Arc::new(Exporter::new("0.1.0").unwrap()),
        None,
    ));

    let response = get(create_router(state), "/containers").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let response = get(app, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["container_collector"].is_object());
    assert!(health["components"]["process_counter"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::CONTAINER_COLLECTOR, "daemon unreachable")
        .await;

    let response = get(app, "/healthz").await;
    // A failed poll is retried, so the agent still reports live
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["container_collector"]["message"],
        "daemon unreachable"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::PROCESS_COUNTER, "procfs missing")
        .await;

    let response = get(app, "/healthz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let response = get(app, "/readyz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let response = get(app, "/readyz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);
}
