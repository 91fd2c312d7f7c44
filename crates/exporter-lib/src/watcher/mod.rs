//! Watch subscription for VPA objects
//!
//! Wraps the kube runtime watcher with a local cache so consumers receive
//! statically typed add / update / delete callbacks, including the previous
//! object on update. The cache is re-delivered as updates on a fixed resync
//! period, and a watch restart turns objects that disappeared meanwhile into
//! deletes.

mod informer;

#[cfg(test)]
mod tests;

pub use informer::Informer;

use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use std::time::Duration;
use tracing::info;

use crate::models::VerticalPodAutoscaler;
use crate::observability::ExporterMetrics;

/// Default period between full resyncs of the local cache
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Callbacks for changes to watched objects
///
/// Resyncs re-deliver unchanged objects through `on_update`, so
/// implementations must be idempotent.
pub trait ResourceEventHandler<K>: Send {
    /// An object appeared that was not cached before
    fn on_add(&mut self, obj: &K);

    /// A cached object was re-delivered, changed or not
    fn on_update(&mut self, old: &K, new: &K);

    /// An object was deleted; `obj` is its last known state
    fn on_delete(&mut self, obj: &K);
}

/// Watch VPA objects in all namespaces and feed them to `handler`
///
/// Runs until the watch stream ends, which only happens on shutdown.
pub async fn watch_vpas<H>(
    client: Client,
    handler: H,
    metrics: ExporterMetrics,
    resync_period: Duration,
) where
    H: ResourceEventHandler<VerticalPodAutoscaler>,
{
    let api: Api<VerticalPodAutoscaler> = Api::all(client);
    let stream = watcher(api, watcher::Config::default()).default_backoff();

    info!(
        resync_secs = resync_period.as_secs(),
        "Watching VerticalPodAutoscaler objects"
    );

    Informer::new(handler, metrics)
        .run(stream, resync_period)
        .await;
}
