//! VPA Exporter
//!
//! Watches VerticalPodAutoscaler objects cluster-wide and serves their
//! recommendations as Prometheus gauges.

use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::{
    client,
    observability::{self, ExporterMetrics, StructuredLogger, SERVICE_NAME},
    profiling::ContinuousProfiler,
    watcher, RecommendationMetrics,
};
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod api;
mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let config = config::ExporterConfig::load(&cli)?;

    let tracing_guard = observability::init_tracing(config.otel_endpoint.as_deref())
        .context("failed to initialize tracing")?;
    info!(tracing_export = tracing_guard.is_exporting(), "Starting vpa-exporter");

    let profiler = match config.pyroscope_addr.as_deref() {
        Some(addr) => match ContinuousProfiler::start(addr, SERVICE_NAME) {
            Ok(profiler) => Some(profiler),
            Err(e) => {
                warn!(error = %e, "Continuous profiling disabled");
                None
            }
        },
        None => None,
    };

    let kube_client = client::connect(config.kubeconfig.as_deref())
        .await
        .context("failed to connect to kubernetes cluster")?;

    let registry = Registry::new();
    observability::register_process_collector(&registry)
        .context("failed to register process metrics")?;
    let exporter_metrics =
        ExporterMetrics::new(&registry).context("failed to register exporter metrics")?;
    let recommendations = RecommendationMetrics::new(&registry)
        .context("failed to register recommendation metrics")?;

    tokio::spawn(watcher::watch_vpas(
        kube_client,
        recommendations,
        exporter_metrics,
        config.resync_interval(),
    ));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let logger = StructuredLogger::new(SERVICE_NAME);
    logger.log_startup(EXPORTER_VERSION, &addr, config.resync_interval_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(api::AppState::new(registry, shutdown_rx.clone()));
    let mut server = tokio::spawn(api::serve(listener, state, shutdown_rx));

    let result = tokio::select! {
        reason = shutdown_signal() => {
            logger.log_shutdown(reason);
            let _ = shutdown_tx.send(true);
            api::shutdown_with_grace(&mut server, config.shutdown_grace()).await
        }
        joined = &mut server => api::join_result(joined),
    };
    // Ends any CPU profile still sampling on a blocking thread
    let _ = shutdown_tx.send(true);

    if let Err(e) = &result {
        error!(error = %e, "API server failed");
    }

    if let Some(profiler) = profiler {
        profiler.stop();
    }
    tracing_guard.shutdown();

    result
}

/// Wait for SIGINT or SIGTERM and name the one received
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    return wait_for_ctrl_c().await;
                }
            };

        tokio::select! {
            reason = wait_for_ctrl_c() => reason,
            _ = sigterm.recv() => "SIGTERM received",
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await
    }
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT received"
}
