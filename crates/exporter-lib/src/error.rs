//! Error types for the exporter library

use thiserror::Error;

use crate::quantity::QuantityError;

pub type Result<T, E = ExporterError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to load in-cluster config: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("invalid quantity: {0}")]
    Quantity(#[from] QuantityError),

    #[error("tracing setup failed: {0}")]
    Tracing(String),

    #[error("profiler error: {0}")]
    Profiler(#[from] pprof::Error),

    #[error("profile upload failed: {0}")]
    Upload(#[from] reqwest::Error),

    #[error("invalid collector address {0}")]
    InvalidAddress(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("could not determine home directory for the default kubeconfig")]
    NoHomeDir,
}
