//! Exporter configuration
//!
//! Layers, lowest precedence first: defaults, optional config file,
//! `EXPORTER_*` environment variables, `OTEL_ENDPOINT` / `PYROSCOPE_ADDR`,
//! command-line flags.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Exports Vertical Pod Autoscaler recommendations as Prometheus metrics
#[derive(Debug, Default, Parser)]
#[command(name = "vpa-exporter", version, about, long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file, used when not running in a cluster
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port for the metrics, health and profiling endpoints
    #[arg(long)]
    pub port: Option<u16>,
}

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// API server port for metrics/health/pprof
    #[serde(default = "default_port")]
    pub port: u16,

    /// Period between full resyncs of the VPA cache
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Time in-flight requests get to finish on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// OTLP/HTTP trace collector endpoint
    #[serde(default)]
    pub otel_endpoint: Option<String>,

    /// Continuous profiling collector address
    #[serde(default)]
    pub pyroscope_addr: Option<String>,

    #[serde(skip)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_port() -> u16 {
    8080
}

fn default_resync_interval() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    5
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ExporterConfig {
    /// Load configuration from file, environment and flags
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_with(
            cli,
            std::env::var("OTEL_ENDPOINT").ok(),
            std::env::var("PYROSCOPE_ADDR").ok(),
        )
    }

    fn load_with(
        cli: &Cli,
        otel_endpoint: Option<String>,
        pyroscope_addr: Option<String>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("EXPORTER").try_parsing(true))
            .set_override_option("otel_endpoint", non_empty(otel_endpoint))?
            .set_override_option("pyroscope_addr", non_empty(pyroscope_addr))?
            .set_override_option("port", cli.port.map(i64::from))?
            .build()
            .context("Failed to load configuration")?;

        let mut config: ExporterConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.otel_endpoint = non_empty(config.otel_endpoint);
        config.pyroscope_addr = non_empty(config.pyroscope_addr);
        config.kubeconfig = cli.kubeconfig.clone();

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.resync_interval_secs == 0 {
            bail!("resync_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
