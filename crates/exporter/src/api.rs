//! HTTP API for metrics, probes and profiling

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use exporter_lib::profiling;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const PPROF_INDEX: &str = "\
/debug/pprof/

profiles:
  cmdline  the command line of the running process
  profile  CPU profile; use ?seconds=N to set the duration (default 30, max 300)
";

/// Shared application state
pub struct AppState {
    pub registry: Registry,
    /// Flips to true on shutdown; running CPU profiles end early
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(registry: Registry, shutdown: watch::Receiver<bool>) -> Self {
        Self { registry, shutdown }
    }
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        buffer,
    )
        .into_response()
}

fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Liveness probe
#[tracing::instrument(name = "health", skip_all, fields(user_agent = user_agent(&headers)))]
async fn health(headers: HeaderMap) -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Readiness probe
#[tracing::instrument(name = "ready", skip_all, fields(user_agent = user_agent(&headers)))]
async fn ready(headers: HeaderMap) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn pprof_index() -> &'static str {
    PPROF_INDEX
}

async fn pprof_cmdline() -> String {
    std::env::args().collect::<Vec<_>>().join("\0")
}

#[derive(Debug, Deserialize)]
struct ProfileParams {
    seconds: Option<u64>,
}

async fn pprof_profile(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProfileParams>,
) -> Response {
    let duration = profiling::profile_duration(params.seconds);
    info!(seconds = duration.as_secs(), "Serving CPU profile");

    match profiling::cpu_profile(duration, state.shutdown.clone()).await {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"profile\""),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "CPU profile unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("could not start CPU profile: {e}\n"),
            )
                .into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", any(health))
        .route("/healthz", any(health))
        .route("/ready", any(ready))
        .route("/readyz", any(ready))
        .route("/debug/pprof", get(pprof_index))
        .route("/debug/pprof/", get(pprof_index))
        .route("/debug/pprof/cmdline", get(pprof_cmdline))
        .route("/debug/pprof/profile", get(pprof_profile))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` flips to true
///
/// Returns once in-flight requests have drained.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);
    info!(addr = %listener.local_addr()?, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("API server stopped");
    Ok(())
}

/// Flatten the outcome of the server task into one result
pub fn join_result(
    joined: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow::Error::new(e).context("API server task failed")),
    }
}

/// Wait up to `grace` for the server task to drain, then abort it
///
/// Shutdown must already have been signalled to the server.
pub async fn shutdown_with_grace(
    server: &mut JoinHandle<anyhow::Result<()>>,
    grace: Duration,
) -> anyhow::Result<()> {
    match tokio::time::timeout(grace, &mut *server).await {
        Ok(joined) => join_result(joined),
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed, aborting API server"
            );
            server.abort();
            Ok(())
        }
    }
}
