//! VPA recommendation gauges
//!
//! Maps the recommendation block of a VerticalPodAutoscaler onto the
//! `vpa_recommendations` gauge vector. Every container recommendation
//! yields eight series: four recommendation types for each of CPU and
//! memory. Series are overwritten on add/update and removed by a
//! partial label match on delete.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use prometheus::core::Collector;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::models::{RecommendedContainerResources, VerticalPodAutoscaler, RESOURCE_CPU, RESOURCE_MEMORY};
use crate::quantity::approximate_f64;
use crate::watcher::ResourceEventHandler;

pub const METRIC_NAME: &str = "vpa_recommendations";
const METRIC_HELP: &str = "The recommendations calculated by the vpa resource";

/// Label names, in the order values are passed to the gauge vector
pub mod labels {
    pub const NAME: &str = "name";
    pub const NAMESPACE: &str = "namespace";
    pub const TARGET_REF_NAME: &str = "target_ref_name";
    pub const TARGET_REF_KIND: &str = "target_ref_kind";
    pub const CONTAINER_NAME: &str = "container_name";
    pub const TYPE: &str = "type";
    pub const RESOURCE: &str = "resource";
    pub const UNIT: &str = "unit";

    pub const ALL: [&str; 8] = [
        NAME,
        NAMESPACE,
        TARGET_REF_NAME,
        TARGET_REF_KIND,
        CONTAINER_NAME,
        TYPE,
        RESOURCE,
        UNIT,
    ];
}

/// Which bound of a container recommendation a series reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationType {
    Target,
    LowerBound,
    UpperBound,
    UncappedTarget,
}

impl RecommendationType {
    pub const ALL: [RecommendationType; 4] = [
        RecommendationType::Target,
        RecommendationType::LowerBound,
        RecommendationType::UpperBound,
        RecommendationType::UncappedTarget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Target => "target",
            RecommendationType::LowerBound => "lowerBound",
            RecommendationType::UpperBound => "upperBound",
            RecommendationType::UncappedTarget => "uncappedTarget",
        }
    }

    fn bounds<'a>(&self, rec: &'a RecommendedContainerResources) -> &'a BTreeMap<String, Quantity> {
        match self {
            RecommendationType::Target => &rec.target,
            RecommendationType::LowerBound => &rec.lower_bound,
            RecommendationType::UpperBound => &rec.upper_bound,
            RecommendationType::UncappedTarget => &rec.uncapped_target,
        }
    }
}

/// Resource reported by a series, with its fixed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => RESOURCE_CPU,
            ResourceKind::Memory => RESOURCE_MEMORY,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "core",
            ResourceKind::Memory => "byte",
        }
    }
}

/// Labels identifying all series of one VPA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpaLabels<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub target_ref_name: &'a str,
    pub target_ref_kind: &'a str,
}

impl<'a> VpaLabels<'a> {
    pub fn from_vpa(vpa: &'a VerticalPodAutoscaler) -> Self {
        let (target_ref_kind, target_ref_name) = vpa.target_ref_parts();
        Self {
            name: vpa.metadata.name.as_deref().unwrap_or_default(),
            namespace: vpa.metadata.namespace.as_deref().unwrap_or_default(),
            target_ref_name,
            target_ref_kind,
        }
    }

    fn matchers(&self) -> HashMap<&'static str, &'a str> {
        HashMap::from([
            (labels::NAME, self.name),
            (labels::NAMESPACE, self.namespace),
            (labels::TARGET_REF_NAME, self.target_ref_name),
            (labels::TARGET_REF_KIND, self.target_ref_kind),
        ])
    }
}

/// The `vpa_recommendations` gauge vector
///
/// Clones share the same series. The vector synchronizes internally, so
/// scrapes and watch callbacks may run concurrently.
#[derive(Clone)]
pub struct RecommendationMetrics {
    gauge: GaugeVec,
}

impl RecommendationMetrics {
    /// Create the gauge vector and register it on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let gauge = GaugeVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &labels::ALL)?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(Self { gauge })
    }

    /// Write the eight series of every container recommendation
    ///
    /// A VPA without a computed recommendation is left untouched. A container
    /// whose values cannot be resolved is logged and skipped. Returns the
    /// number of containers recorded.
    pub fn record(&self, vpa: &VerticalPodAutoscaler) -> usize {
        let vpa_labels = VpaLabels::from_vpa(vpa);
        let Some(recommendations) = vpa.container_recommendations() else {
            debug!(
                namespace = %vpa_labels.namespace,
                name = %vpa_labels.name,
                "VPA has no recommendation yet"
            );
            return 0;
        };

        let mut recorded = 0;
        for rec in recommendations {
            match self.record_container(&vpa_labels, rec) {
                Ok(()) => recorded += 1,
                Err(e) => {
                    error!(
                        namespace = %vpa_labels.namespace,
                        name = %vpa_labels.name,
                        container = %rec.container_name,
                        error = %e,
                        "Failed to record container recommendation"
                    );
                }
            }
        }

        debug!(
            namespace = %vpa_labels.namespace,
            name = %vpa_labels.name,
            containers = recorded,
            "Recorded VPA recommendations"
        );
        recorded
    }

    fn record_container(
        &self,
        vpa_labels: &VpaLabels<'_>,
        rec: &RecommendedContainerResources,
    ) -> Result<()> {
        // Resolve every value before touching the vector so a bad quantity
        // never leaves a partially written container behind.
        let mut values = Vec::with_capacity(8);
        for kind in RecommendationType::ALL {
            for resource in ResourceKind::ALL {
                let value = approximate_f64(kind.bounds(rec).get(resource.as_str()))?;
                values.push((kind, resource, value));
            }
        }

        for (kind, resource, value) in values {
            self.gauge
                .get_metric_with_label_values(&[
                    vpa_labels.name,
                    vpa_labels.namespace,
                    vpa_labels.target_ref_name,
                    vpa_labels.target_ref_kind,
                    rec.container_name.as_str(),
                    kind.as_str(),
                    resource.as_str(),
                    resource.unit(),
                ])?
                .set(value);
        }
        Ok(())
    }

    /// Remove every series of this VPA, whatever its container, type, resource or unit
    pub fn remove(&self, vpa: &VerticalPodAutoscaler) -> usize {
        let vpa_labels = VpaLabels::from_vpa(vpa);
        let removed = self.remove_matching(&vpa_labels.matchers(), |_| true);
        info!(
            namespace = %vpa_labels.namespace,
            name = %vpa_labels.name,
            series = removed,
            "Removed VPA recommendations"
        );
        removed
    }

    /// Remove series of containers that no longer appear in the recommendation
    pub fn prune_containers(&self, vpa: &VerticalPodAutoscaler) -> usize {
        let Some(recommendations) = vpa.container_recommendations() else {
            return 0;
        };
        let current: HashSet<&str> = recommendations
            .iter()
            .map(|r| r.container_name.as_str())
            .collect();

        let vpa_labels = VpaLabels::from_vpa(vpa);
        let removed = self.remove_matching(&vpa_labels.matchers(), |series| {
            series
                .get(&labels::CONTAINER_NAME)
                .map_or(false, |c| !current.contains(c))
        });
        if removed > 0 {
            debug!(
                namespace = %vpa_labels.namespace,
                name = %vpa_labels.name,
                series = removed,
                "Pruned series of removed containers"
            );
        }
        removed
    }

    /// Remove series whose labels contain `matchers` and satisfy `predicate`
    fn remove_matching<F>(&self, matchers: &HashMap<&'static str, &str>, predicate: F) -> usize
    where
        F: Fn(&HashMap<&str, &str>) -> bool,
    {
        let mut removed = 0;
        for family in self.gauge.collect() {
            for metric in family.get_metric() {
                let series: HashMap<&str, &str> = metric
                    .get_label()
                    .iter()
                    .map(|pair| (pair.get_name(), pair.get_value()))
                    .collect();

                let matches = matchers
                    .iter()
                    .all(|(name, value)| series.get(name) == Some(value));
                if matches && predicate(&series) && self.gauge.remove(&series).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

fn container_names(vpa: &VerticalPodAutoscaler) -> HashSet<&str> {
    vpa.container_recommendations()
        .into_iter()
        .flatten()
        .map(|r| r.container_name.as_str())
        .collect()
}

impl ResourceEventHandler<VerticalPodAutoscaler> for RecommendationMetrics {
    fn on_add(&mut self, vpa: &VerticalPodAutoscaler) {
        self.record(vpa);
    }

    fn on_update(&mut self, old: &VerticalPodAutoscaler, new: &VerticalPodAutoscaler) {
        // A changed target ref moves the series to new label values
        if VpaLabels::from_vpa(old) != VpaLabels::from_vpa(new) {
            self.remove(old);
            self.record(new);
            return;
        }

        self.record(new);
        // Resyncs deliver identical container sets; only a change can leave stale series
        if container_names(old) != container_names(new) {
            self.prune_containers(new);
        }
    }

    fn on_delete(&mut self, vpa: &VerticalPodAutoscaler) {
        self.remove(vpa);
    }
}
