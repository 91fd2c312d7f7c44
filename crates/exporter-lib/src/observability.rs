//! Observability infrastructure for the exporter
//!
//! Provides:
//! - Exporter self-metrics (watch events, resyncs, watch errors, cache size)
//! - Tracing subscriber setup with JSON output and optional OTLP export
//! - Structured lifecycle logging

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ExporterError, Result};

/// Service name reported to the trace collector
pub const SERVICE_NAME: &str = "vpa-exporter";

/// Watch event kinds used as the `event` label
pub mod events {
    pub const ADD: &str = "add";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

/// Exporter self-metrics for Prometheus exposition
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct ExporterMetrics {
    watch_events: IntCounterVec,
    resyncs: IntCounter,
    watch_errors: IntCounter,
    watched_objects: IntGauge,
}

impl ExporterMetrics {
    /// Create the self-metrics and register them on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let watch_events = IntCounterVec::new(
            Opts::new(
                "vpa_exporter_watch_events_total",
                "Watch notifications delivered to the recommendation mapper",
            ),
            &["event"],
        )?;
        let resyncs = IntCounter::new(
            "vpa_exporter_resyncs_total",
            "Periodic full resyncs of the local VPA cache",
        )?;
        let watch_errors = IntCounter::new(
            "vpa_exporter_watch_errors_total",
            "Errors reported by the VPA watch stream",
        )?;
        let watched_objects = IntGauge::new(
            "vpa_exporter_watched_objects",
            "Number of VPA objects currently held in the local cache",
        )?;

        registry.register(Box::new(watch_events.clone()))?;
        registry.register(Box::new(resyncs.clone()))?;
        registry.register(Box::new(watch_errors.clone()))?;
        registry.register(Box::new(watched_objects.clone()))?;

        Ok(Self {
            watch_events,
            resyncs,
            watch_errors,
            watched_objects,
        })
    }

    /// Count a delivered watch event of the given kind
    pub fn inc_watch_event(&self, event: &str) {
        self.watch_events.with_label_values(&[event]).inc();
    }

    pub fn inc_resyncs(&self) {
        self.resyncs.inc();
    }

    pub fn inc_watch_errors(&self) {
        self.watch_errors.inc();
    }

    pub fn set_watched_objects(&self, count: usize) {
        self.watched_objects.set(count as i64);
    }
}

/// Register the process collector (cpu, memory, fds) where supported
pub fn register_process_collector(registry: &Registry) -> Result<()> {
    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;
    #[cfg(not(target_os = "linux"))]
    let _ = registry;
    Ok(())
}

/// Keeps the trace pipeline alive; flushes pending spans on shutdown
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    /// Whether spans are exported to a collector
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }

    /// Flush and stop the trace exporter
    pub fn shutdown(mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                error!(error = %e, "Failed to shutdown tracer");
            }
        }
    }
}

/// Initialize tracing with JSON output and env filter
///
/// When `otel_endpoint` is set, spans are also exported over OTLP/HTTP.
pub fn init_tracing(otel_endpoint: Option<&str>) -> Result<TracingGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(endpoint) = otel_endpoint else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ExporterError::Tracing(e.to_string()))?;
        return Ok(TracingGuard { provider: None });
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| ExporterError::Tracing(format!("failed to create trace exporter: {e}")))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_service_name(SERVICE_NAME)
                .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
                .build(),
        )
        .build();

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    opentelemetry::global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer(SERVICE_NAME);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
        .map_err(|e| ExporterError::Tracing(e.to_string()))?;

    info!(endpoint = %endpoint, "Exporting traces over OTLP");

    Ok(TracingGuard {
        provider: Some(provider),
    })
}

/// Structured logger for exporter lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, addr: &str, resync_secs: u64) {
        info!(
            event = "exporter_started",
            service = %self.service,
            version = %version,
            addr = %addr,
            resync_secs = resync_secs,
            "VPA exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            service = %self.service,
            reason = %reason,
            "VPA exporter shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_metrics_registered() {
        let registry = Registry::new();
        let metrics = ExporterMetrics::new(&registry).unwrap();

        metrics.inc_watch_event(events::ADD);
        metrics.inc_watch_event(events::ADD);
        metrics.inc_watch_event(events::DELETE);
        metrics.inc_resyncs();
        metrics.set_watched_objects(3);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"vpa_exporter_watch_events_total"));
        assert!(names.contains(&"vpa_exporter_resyncs_total"));
        assert!(names.contains(&"vpa_exporter_watched_objects"));

        let family = families
            .iter()
            .find(|f| f.get_name() == "vpa_exporter_watch_events_total")
            .unwrap();
        let add = family
            .get_metric()
            .iter()
            .find(|m| m.get_label()[0].get_value() == events::ADD)
            .unwrap();
        assert_eq!(add.get_counter().get_value(), 2.0);
    }

    #[test]
    fn test_exporter_metrics_reject_double_registration() {
        let registry = Registry::new();
        ExporterMetrics::new(&registry).unwrap();
        assert!(ExporterMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-exporter");
        assert_eq!(logger.service, "test-exporter");
    }
}
