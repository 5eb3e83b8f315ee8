//! Assessment Worker
//!
//! Drains a single SQS queue one message at a time and serves `/health` so the
//! orchestrator can restart the task when the consumer stalls.
//!
//! The consumer loop runs on the main task; the health server runs alongside
//! it and only reads the shared `HealthState`. SIGTERM/SIGINT request a
//! cooperative stop. The process exits non-zero when the worker hits a fatal
//! queue error or cannot start.
//!
//! See `aw-config` for the environment variables.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use aw_api::{create_router, serve, AppState};
use aw_common::{logging::init_logging, WorkerStatus};
use aw_config::WorkerConfig;
use aw_queue::sqs::{build_client, SqsQueueConsumer};
use aw_worker::{HealthConfig, HealthState, LoggingProcessor, Worker, WorkerSettings};

/// How long the health server gets to drain after the worker exits
const HEALTH_SERVER_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    info!("Starting Assessment Worker");

    let config = WorkerConfig::load().context("Invalid worker configuration")?;
    info!(
        queue_name = %config.sqs_queue_name,
        region = %config.region,
        health_port = config.health_port,
        wait_time_seconds = config.sqs_wait_time_seconds,
        endpoint_url = config.endpoint_url().unwrap_or("(default AWS endpoint)"),
        "Configuration loaded"
    );

    let state = Arc::new(HealthState::new());

    // 1. Health server, bound before touching the queue so a taken port fails fast
    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Health port {} is not available", config.health_port))?;

    let mut app_state = AppState::new(
        state.clone(),
        HealthConfig::from(&config),
        config.service_name.clone(),
    );
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => app_state = app_state.with_metrics(handle),
        Err(e) => warn!(error = %e, "Prometheus recorder not installed, /metrics will be empty"),
    }
    let app = create_router(app_state).layer(TraceLayer::new_for_http());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
            };
            if let Err(e) = serve(listener, app, shutdown).await {
                error!(error = %e, "Health server failed");
            }
        })
    };

    // 2. Queue client and URL lookup
    let client = build_client(&config.region, config.endpoint_url()).await;
    info!("SQS client initialized");

    let consumer = match &config.sqs_queue_url {
        Some(url) => SqsQueueConsumer::from_queue_url(client, url.clone()),
        None => match SqsQueueConsumer::from_queue_name(client, &config.sqs_queue_name).await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(queue_name = %config.sqs_queue_name, error = %e, "Failed to get queue URL");
                state.set_status(WorkerStatus::Error);
                stop_health_server(&shutdown_tx, server_handle).await;
                return Err(e).context("Queue lookup failed");
            }
        },
    };

    // 3. Worker plus signal-driven stop
    let worker = Worker::new(
        Arc::new(consumer),
        Arc::new(LoggingProcessor),
        state.clone(),
        WorkerSettings::from(&config),
    );

    let stop = worker.stop_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        stop.stop();
    });

    let result = worker.run().await;

    info!("Worker stopped, cleaning up...");
    stop_health_server(&shutdown_tx, server_handle).await;

    match result {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Worker terminated with a fatal error");
            Err(e.into())
        }
    }
}

async fn stop_health_server(shutdown_tx: &broadcast::Sender<()>, handle: JoinHandle<()>) {
    let _ = shutdown_tx.send(());
    let abort = handle.abort_handle();
    if tokio::time::timeout(HEALTH_SERVER_GRACE, handle).await.is_err() {
        warn!("Health server did not stop within the grace period, aborting");
        abort.abort();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
