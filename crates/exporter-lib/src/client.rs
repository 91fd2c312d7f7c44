//! Kubernetes client construction
//!
//! Inside a pod the service-account config is used. Outside a cluster the
//! client falls back to a kubeconfig file: an explicit path, `$KUBECONFIG`,
//! or `~/.kube/config`.

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ExporterError, Result};

/// Environment variable set by the kubelet in every pod
const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Whether the process runs inside a cluster
pub fn in_cluster() -> bool {
    std::env::var_os(SERVICE_HOST_ENV).is_some()
}

/// Resolve the kubeconfig path used outside a cluster
pub fn kubeconfig_path(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os("KUBECONFIG").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let home = dirs_next::home_dir().ok_or(ExporterError::NoHomeDir)?;
    Ok(home.join(".kube").join("config"))
}

/// Load client config from a kubeconfig file using its current context
pub async fn config_from_kubeconfig(path: &Path) -> Result<Config> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(config)
}

/// Resolve cluster credentials, preferring the in-cluster service account
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config> {
    if in_cluster() {
        debug!("Using in-cluster service account config");
        return Ok(Config::incluster()?);
    }

    let path = kubeconfig_path(kubeconfig)?;
    debug!(path = %path.display(), "Not running in a cluster, using kubeconfig");
    config_from_kubeconfig(&path).await
}

/// Build a client and verify the API server is reachable
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = load_config(kubeconfig).await?;
    let cluster_url = config.cluster_url.to_string();
    let client = Client::try_from(config)?;

    let version = client.apiserver_version().await?;
    info!(
        cluster = %cluster_url,
        version = %version.git_version,
        "Connected to Kubernetes API server"
    );
    Ok(client)
}
