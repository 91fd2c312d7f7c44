//! Library for exporting Vertical Pod Autoscaler recommendations
//!
//! This crate provides the core functionality for:
//! - Typed VPA resources and quantity conversion
//! - Watching VPA objects with a resyncing local cache
//! - Mapping recommendations onto Prometheus gauges
//! - Cluster client setup, tracing and profiling

pub mod client;
pub mod error;
pub mod models;
pub mod observability;
pub mod profiling;
pub mod quantity;
pub mod recommendations;
pub mod watcher;

pub use error::{ExporterError, Result};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger, TracingGuard};
pub use recommendations::RecommendationMetrics;
pub use watcher::{Informer, ResourceEventHandler};
