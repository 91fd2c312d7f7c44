//! Cache-backed dispatch of watcher events

use futures::{Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Event;
use kube::Resource;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::pin::pin;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::ResourceEventHandler;
use crate::observability::{events, ExporterMetrics};

/// Local cache of watched objects driving a [`ResourceEventHandler`]
///
/// Owned by a single task; the cache is never shared.
pub struct Informer<K, H>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    cache: HashMap<ObjectRef<K>, K>,
    handler: H,
    metrics: ExporterMetrics,
}

impl<K, H> Informer<K, H>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + Hash + Clone,
    H: ResourceEventHandler<K>,
{
    pub fn new(handler: H, metrics: ExporterMetrics) -> Self {
        Self {
            cache: HashMap::new(),
            handler,
            metrics,
        }
    }

    /// Number of cached objects
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Apply one watcher event to the cache and notify the handler
    pub fn handle_event(&mut self, event: Event<K>) {
        match event {
            Event::Applied(obj) => self.apply(obj),
            Event::Deleted(obj) => self.delete(obj),
            Event::Restarted(objs) => self.relist(objs),
        }
        self.metrics.set_watched_objects(self.cache.len());
    }

    /// Re-deliver every cached object as an unchanged update
    pub fn resync(&mut self) {
        self.metrics.inc_resyncs();
        for obj in self.cache.values() {
            self.handler.on_update(obj, obj);
        }
        debug!(objects = self.cache.len(), "Resynced watch cache");
    }

    /// Consume a watcher stream, resyncing every `resync_period`
    ///
    /// Stream errors are logged and counted; the loop only ends with the stream.
    pub async fn run<S, E>(mut self, stream: S, resync_period: Duration)
    where
        S: Stream<Item = Result<Event<K>, E>>,
        E: Display,
    {
        let mut stream = pin!(stream);
        let mut resync = interval_at(Instant::now() + resync_period, resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => {
                        self.metrics.inc_watch_errors();
                        warn!(error = %e, "Watch stream error");
                    }
                    None => {
                        warn!("Watch stream ended");
                        break;
                    }
                },
                _ = resync.tick() => self.resync(),
            }
        }
    }

    fn apply(&mut self, obj: K) {
        let key = ObjectRef::from_obj(&obj);
        let previous = self.cache.insert(key.clone(), obj);
        let current = &self.cache[&key];

        match previous {
            Some(old) => {
                self.metrics.inc_watch_event(events::UPDATE);
                self.handler.on_update(&old, current);
            }
            None => {
                self.metrics.inc_watch_event(events::ADD);
                self.handler.on_add(current);
            }
        }
    }

    fn delete(&mut self, obj: K) {
        self.cache.remove(&ObjectRef::from_obj(&obj));
        self.metrics.inc_watch_event(events::DELETE);
        self.handler.on_delete(&obj);
    }

    /// Replace the cache with a fresh listing
    fn relist(&mut self, objs: Vec<K>) {
        let listed: HashSet<ObjectRef<K>> = objs.iter().map(ObjectRef::from_obj).collect();
        let vanished: Vec<ObjectRef<K>> = self
            .cache
            .keys()
            .filter(|key| !listed.contains(*key))
            .cloned()
            .collect();

        for key in vanished {
            if let Some(obj) = self.cache.remove(&key) {
                self.metrics.inc_watch_event(events::DELETE);
                self.handler.on_delete(&obj);
            }
        }

        debug!(objects = objs.len(), "Watch restarted with fresh listing");
        for obj in objs {
            self.apply(obj);
        }
    }
}
