//! Vertical Pod Autoscaler resource types
//!
//! Only the fields the exporter reads are modelled; everything else in the
//! `autoscaling.k8s.io/v1` schema is ignored during deserialization.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource name for CPU in recommendation maps
pub const RESOURCE_CPU: &str = "cpu";
/// Resource name for memory in recommendation maps
pub const RESOURCE_MEMORY: &str = "memory";

/// Spec of a VerticalPodAutoscaler
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "autoscaling.k8s.io",
    version = "v1",
    kind = "VerticalPodAutoscaler",
    plural = "verticalpodautoscalers",
    namespaced,
    status = "VerticalPodAutoscalerStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerSpec {
    /// Workload controller the autoscaler acts on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<CrossVersionObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<PodUpdatePolicy>,
}

/// Reference to the scaled workload (e.g. a Deployment)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodUpdatePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<String>,
}

/// Status written by the VPA recommender
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerStatus {
    /// Most recently computed recommendation, absent until the recommender runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendedPodResources>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPodResources {
    #[serde(default)]
    pub container_recommendations: Vec<RecommendedContainerResources>,
}

/// Per-container recommendation bounds, keyed by resource name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedContainerResources {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub target: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub lower_bound: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub upper_bound: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub uncapped_target: BTreeMap<String, Quantity>,
}

impl VerticalPodAutoscaler {
    /// Target reference kind and name, empty when the spec has none
    pub fn target_ref_parts(&self) -> (&str, &str) {
        match &self.spec.target_ref {
            Some(r) => (r.kind.as_str(), r.name.as_str()),
            None => ("", ""),
        }
    }

    /// Container recommendations, or `None` if no recommendation was computed yet
    pub fn container_recommendations(&self) -> Option<&[RecommendedContainerResources]> {
        self.status
            .as_ref()
            .and_then(|s| s.recommendation.as_ref())
            .map(|r| r.container_recommendations.as_slice())
    }
}
