//! HTTP API for health checks, Prometheus metrics and scheduler control

use crate::client::{ErrorResponse, ShutdownResponse, ToggleResponse};
use anyhow::Context;
use autopilot_lib::{
    health::{ComponentStatus, HealthRegistry},
    Scheduler, SchedulerError,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub scheduler: Scheduler,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        scheduler: Scheduler,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            health_registry,
            scheduler,
            shutdown,
        }
    }

    /// Resolves once a shutdown has been requested
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

fn unknown_task(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: SchedulerError::UnknownTask(name.to_string()).to_string(),
        }),
    )
        .into_response()
}

/// 503 only when a component is unhealthy; degraded still serves
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (status_for(health.status != ComponentStatus::Unhealthy), Json(health))
}

/// 503 until the scheduler has started, or while a component is unhealthy
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    (status_for(readiness.ready), Json(readiness))
}

fn status_for(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

async fn enable_task(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if state.scheduler.enable(&name).await {
        Json(ToggleResponse {
            task: name,
            enabled: true,
        })
        .into_response()
    } else {
        unknown_task(&name)
    }
}

async fn disable_task(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if state.scheduler.disable(&name).await {
        Json(ToggleResponse {
            task: name,
            enabled: false,
        })
        .into_response()
    } else {
        unknown_task(&name)
    }
}

async fn execute_task(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.scheduler.execute_now(&name).await {
        Ok(result) => Json(result).into_response(),
        Err(SchedulerError::UnknownTask(_)) => unknown_task(&name),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn shutdown(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Shutdown requested via API");
    state.request_shutdown();
    (
        StatusCode::ACCEPTED,
        Json(ShutdownResponse {
            status: "stopping".to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/tasks/:name/enable", post(enable_task))
        .route("/tasks/:name/disable", post(disable_task))
        .route("/tasks/:name/execute", post(execute_task))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

/// Bind the API address. Done before the scheduler starts so a busy port
/// aborts startup.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API address {addr}"))
}

/// Serve the API until a shutdown is requested
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let mut shutdown = state.shutdown_signal();
    let app = create_router(state);

    info!(addr = ?listener.local_addr().ok(), "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}
