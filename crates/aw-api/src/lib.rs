//! Assessment Worker health API
//!
//! HTTP endpoints for:
//! - Orchestrator health check (`/health`)
//! - Kubernetes-style probes (liveness/readiness)
//! - Prometheus metrics
//!
//! Handlers only read the shared `HealthState`; nothing here writes to it.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use aw_common::{clock::now_epoch_secs, WorkerStatus};
use aw_worker::{evaluate, HealthConfig, HealthDiagnostics, HealthState};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthState>,
    pub health_config: HealthConfig,
    pub service_name: String,
    /// Installed Prometheus recorder, if any
    pub metrics: Option<PrometheusHandle>,
    /// Time source in epoch seconds
    pub clock: fn() -> f64,
}

impl AppState {
    pub fn new(health: Arc<HealthState>, health_config: HealthConfig, service_name: impl Into<String>) -> Self {
        Self {
            health,
            health_config,
            service_name: service_name.into(),
            metrics: None,
            clock: now_epoch_secs,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> f64) -> Self {
        self.clock = clock;
        self
    }
}

/// Subset of diagnostics returned with a healthy verdict
#[derive(Debug, Serialize)]
pub struct HealthyDetails {
    pub heartbeat_age_seconds: Option<f64>,
    pub is_long_task_running: bool,
}

/// `200` body
#[derive(Debug, Serialize)]
pub struct HealthyResponse {
    pub status: &'static str,
    pub service: String,
    pub details: HealthyDetails,
}

/// `503` body
#[derive(Debug, Serialize)]
pub struct UnavailableResponse {
    pub status: &'static str,
    pub service: String,
    pub reason: String,
    pub details: HealthDiagnostics,
}

/// Kubernetes probe response
#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    /// LIVE, READY, NOT_READY
    pub status: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Health server listening");
    }
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.health.snapshot();
    let verdict = evaluate(&snapshot, &state.health_config, (state.clock)());

    if verdict.healthy {
        let body = HealthyResponse {
            status: "ok",
            service: state.service_name.clone(),
            details: HealthyDetails {
                heartbeat_age_seconds: verdict.diagnostics.heartbeat_age_seconds,
                is_long_task_running: verdict.diagnostics.is_long_task_running,
            },
        };
        (StatusCode::OK, Json(body)).into_response()
    } else {
        let reason = verdict.reason();
        debug!(reason = %reason, "Health check failed");
        let body = UnavailableResponse {
            status: "unavailable",
            service: state.service_name.clone(),
            reason,
            details: verdict.diagnostics,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "LIVE" })
}

async fn readiness_probe(State(state): State<AppState>) -> Response {
    let ready = state.health.is_ready() && state.health.status() == WorkerStatus::Running;
    if ready {
        (StatusCode::OK, Json(ProbeResponse { status: "READY" })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ProbeResponse { status: "NOT_READY" })).into_response()
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.as_ref().map(|h| h.render()).unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
