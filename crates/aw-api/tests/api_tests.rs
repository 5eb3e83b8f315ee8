//! API Endpoint Tests
//!
//! Tests for:
//! - `/health` verdicts across idle, long-task and failed worker states
//! - Liveness and readiness probes
//! - Metrics endpoint without a recorder

use std::sync::Arc;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;
use http_body_util::BodyExt;

use aw_common::WorkerStatus;
use aw_worker::{HealthConfig, HealthState};

use aw_api::{create_router, AppState};

const NOW: f64 = 1_700_000_000.0;

fn fixed_now() -> f64 {
    NOW
}

fn create_test_app(state: Arc<HealthState>) -> axum::Router {
    let app_state = AppState::new(
        state,
        HealthConfig {
            heartbeat_timeout: 120.0,
            task_timeout_buffer: 1.5,
        },
        "assessment-worker",
    )
    .with_clock(fixed_now);

    create_router(app_state)
}

fn running_state(heartbeat_age: f64) -> Arc<HealthState> {
    let state = Arc::new(HealthState::new());
    state.set_status(WorkerStatus::Running);
    state.heartbeat(NOW - heartbeat_age);
    state.mark_ready();
    state
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_fresh_state_is_unavailable() {
    let app = create_test_app(Arc::new(HealthState::new()));

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unavailable");
    assert_eq!(json["service"], "assessment-worker");
    assert!(json["reason"].as_str().unwrap().contains("status is STOPPED"));
    assert_eq!(json["details"]["status"], "STOPPED");
    assert!(json["details"]["heartbeat_age_seconds"].is_null());
}

#[tokio::test]
async fn test_recent_heartbeat_is_healthy() {
    let app = create_test_app(running_state(5.0));

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "assessment-worker");
    assert_eq!(json["details"]["heartbeat_age_seconds"], 5.0);
    assert_eq!(json["details"]["is_long_task_running"], false);
    assert!(json.get("reason").is_none());
}

#[tokio::test]
async fn test_stale_heartbeat_is_unavailable() {
    let app = create_test_app(running_state(121.0));

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["reason"].as_str().unwrap().contains("heartbeat overtime"));
    assert_eq!(json["details"]["effective_timeout_seconds"], 120.0);
    assert_eq!(json["details"]["is_overtime"], true);
}

#[tokio::test]
async fn test_long_task_under_budget_is_healthy() {
    let state = running_state(400.0);
    state.begin_task(NOW - 400.0, 300.0);
    let app = create_test_app(state);

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["details"]["is_long_task_running"], true);
}

#[tokio::test]
async fn test_long_task_over_budget_is_unavailable() {
    let state = running_state(460.0);
    state.begin_task(NOW - 460.0, 300.0);
    let app = create_test_app(state);

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["reason"].as_str().unwrap().contains("task overtime"));
    assert_eq!(json["details"]["effective_timeout_seconds"], 450.0);
    assert_eq!(json["details"]["task_elapsed_seconds"], 460.0);
}

#[tokio::test]
async fn test_error_status_is_unavailable() {
    let state = running_state(1.0);
    state.set_status(WorkerStatus::Error);
    let app = create_test_app(state);

    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["reason"].as_str().unwrap().contains("status is ERROR"));
    assert_eq!(json["details"]["is_overtime"], false);
}

#[tokio::test]
async fn test_health_check_does_not_mutate_state() {
    let state = running_state(5.0);
    let before = state.snapshot();

    let (status, _) = get(create_test_app(state.clone()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.snapshot(), before);
}

// ============================================================================
// Probe Tests
// ============================================================================

#[tokio::test]
async fn test_liveness_probe() {
    let app = create_test_app(Arc::new(HealthState::new()));

    let (status, json) = get(app, "/health/live").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "LIVE");
}

#[tokio::test]
async fn test_readiness_probe_before_first_poll() {
    let state = Arc::new(HealthState::new());
    state.set_status(WorkerStatus::Running);
    let app = create_test_app(state);

    let (status, json) = get(app, "/health/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "NOT_READY");
}

#[tokio::test]
async fn test_readiness_probe_after_first_poll() {
    let app = create_test_app(running_state(1.0));

    let (status, json) = get(app, "/health/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "READY");
}

// ============================================================================
// Metrics Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_metrics_without_recorder() {
    let app = create_test_app(Arc::new(HealthState::new()));

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty());
}
