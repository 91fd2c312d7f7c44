//! Tests for cache-backed event dispatch
//!
//! Events are fed directly into the informer, so no cluster is needed.

#[cfg(test)]
mod informer_tests {
    use crate::models::{
        CrossVersionObjectReference, RecommendedContainerResources, RecommendedPodResources,
        VerticalPodAutoscaler, VerticalPodAutoscalerSpec, VerticalPodAutoscalerStatus,
    };
    use crate::observability::ExporterMetrics;
    use crate::recommendations::{RecommendationMetrics, METRIC_NAME};
    use crate::watcher::{Informer, ResourceEventHandler};
    use futures::{stream, StreamExt};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::runtime::watcher::Event;
    use prometheus::Registry;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Handler that records every callback as a readable string
    #[derive(Clone, Default)]
    struct RecordingHandler {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingHandler {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn describe(vpa: &VerticalPodAutoscaler) -> String {
        format!(
            "{}@{}",
            vpa.metadata.name.as_deref().unwrap_or_default(),
            vpa.metadata.resource_version.as_deref().unwrap_or_default()
        )
    }

    impl ResourceEventHandler<VerticalPodAutoscaler> for RecordingHandler {
        fn on_add(&mut self, obj: &VerticalPodAutoscaler) {
            self.push(format!("add {}", describe(obj)));
        }

        fn on_update(&mut self, old: &VerticalPodAutoscaler, new: &VerticalPodAutoscaler) {
            self.push(format!("update {} -> {}", describe(old), describe(new)));
        }

        fn on_delete(&mut self, obj: &VerticalPodAutoscaler) {
            self.push(format!("delete {}", describe(obj)));
        }
    }

    fn vpa(name: &str, version: &str) -> VerticalPodAutoscaler {
        let mut vpa = VerticalPodAutoscaler::new(
            name,
            VerticalPodAutoscalerSpec {
                target_ref: Some(CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: "Deployment".to_string(),
                    name: name.to_string(),
                }),
                update_policy: None,
            },
        );
        vpa.metadata.namespace = Some("default".to_string());
        vpa.metadata.resource_version = Some(version.to_string());
        vpa
    }

    fn with_recommendation(mut vpa: VerticalPodAutoscaler) -> VerticalPodAutoscaler {
        let bounds = BTreeMap::from([
            ("cpu".to_string(), Quantity("250m".to_string())),
            ("memory".to_string(), Quantity("256Mi".to_string())),
        ]);
        vpa.status = Some(VerticalPodAutoscalerStatus {
            recommendation: Some(RecommendedPodResources {
                container_recommendations: vec![RecommendedContainerResources {
                    container_name: "app".to_string(),
                    target: bounds.clone(),
                    lower_bound: bounds.clone(),
                    upper_bound: bounds.clone(),
                    uncapped_target: bounds,
                }],
            }),
        });
        vpa
    }

    fn informer() -> (Informer<VerticalPodAutoscaler, RecordingHandler>, RecordingHandler, Registry) {
        let registry = Registry::new();
        let metrics = ExporterMetrics::new(&registry).unwrap();
        let handler = RecordingHandler::default();
        (Informer::new(handler.clone(), metrics), handler, registry)
    }

    fn gauge_value(registry: &Registry, name: &str) -> f64 {
        registry
            .gather()
            .iter()
            .find(|f| f.get_name() == name)
            .map(|f| {
                let metric = &f.get_metric()[0];
                if f.get_name().ends_with("_total") {
                    metric.get_counter().get_value()
                } else {
                    metric.get_gauge().get_value()
                }
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_applied_unknown_object_is_add() {
        let (mut informer, handler, registry) = informer();

        informer.handle_event(Event::Applied(vpa("web", "1")));

        assert_eq!(handler.calls(), vec!["add web@1"]);
        assert_eq!(informer.cached(), 1);
        assert_eq!(gauge_value(&registry, "vpa_exporter_watched_objects"), 1.0);
    }

    #[test]
    fn test_applied_known_object_is_update_with_old_state() {
        let (mut informer, handler, _registry) = informer();

        informer.handle_event(Event::Applied(vpa("web", "1")));
        informer.handle_event(Event::Applied(vpa("web", "2")));

        assert_eq!(handler.calls(), vec!["add web@1", "update web@1 -> web@2"]);
        assert_eq!(informer.cached(), 1);
    }

    #[test]
    fn test_same_name_in_other_namespace_is_distinct() {
        let (mut informer, handler, _registry) = informer();
        let mut other = vpa("web", "1");
        other.metadata.namespace = Some("staging".to_string());

        informer.handle_event(Event::Applied(vpa("web", "1")));
        informer.handle_event(Event::Applied(other));

        assert_eq!(handler.calls(), vec!["add web@1", "add web@1"]);
        assert_eq!(informer.cached(), 2);
    }

    #[test]
    fn test_deleted_object_is_delete() {
        let (mut informer, handler, registry) = informer();

        informer.handle_event(Event::Applied(vpa("web", "1")));
        informer.handle_event(Event::Deleted(vpa("web", "2")));

        assert_eq!(handler.calls(), vec!["add web@1", "delete web@2"]);
        assert_eq!(informer.cached(), 0);
        assert_eq!(gauge_value(&registry, "vpa_exporter_watched_objects"), 0.0);
    }

    #[test]
    fn test_restart_deletes_vanished_objects_with_last_state() {
        let (mut informer, handler, _registry) = informer();

        informer.handle_event(Event::Applied(vpa("web", "1")));
        informer.handle_event(Event::Applied(vpa("api", "1")));
        informer.handle_event(Event::Restarted(vec![vpa("web", "5"), vpa("batch", "1")]));

        let calls = handler.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[2], "delete api@1");
        assert!(calls.contains(&"update web@1 -> web@5".to_string()));
        assert!(calls.contains(&"add batch@1".to_string()));
        assert_eq!(informer.cached(), 2);
    }

    #[test]
    fn test_restart_with_empty_listing_clears_cache() {
        let (mut informer, handler, _registry) = informer();

        informer.handle_event(Event::Applied(vpa("web", "1")));
        informer.handle_event(Event::Restarted(vec![]));

        assert_eq!(handler.calls(), vec!["add web@1", "delete web@1"]);
        assert_eq!(informer.cached(), 0);
    }

    #[test]
    fn test_resync_redelivers_cached_objects() {
        let (mut informer, handler, registry) = informer();

        informer.handle_event(Event::Applied(vpa("web", "3")));
        informer.resync();

        assert_eq!(handler.calls(), vec!["add web@3", "update web@3 -> web@3"]);
        assert_eq!(gauge_value(&registry, "vpa_exporter_resyncs_total"), 1.0);
    }

    #[tokio::test]
    async fn test_run_continues_after_stream_errors() {
        let (informer, handler, registry) = informer();
        let events = stream::iter(vec![
            Ok(Event::Applied(vpa("web", "1"))),
            Err("connection reset"),
            Ok(Event::Deleted(vpa("web", "2"))),
        ]);

        informer.run(events, Duration::from_secs(60)).await;

        assert_eq!(handler.calls(), vec!["add web@1", "delete web@2"]);
        assert_eq!(gauge_value(&registry, "vpa_exporter_watch_errors_total"), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resyncs_periodically() {
        let (informer, handler, _registry) = informer();
        let events = stream::iter(vec![Ok::<_, &str>(Event::Applied(vpa("web", "1")))])
            .chain(stream::pending());

        let task = tokio::spawn(informer.run(events, Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handler.calls(), vec!["add web@1"]);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(
            handler.calls(),
            vec!["add web@1", "update web@1 -> web@1", "update web@1 -> web@1"]
        );

        task.abort();
    }

    #[test]
    fn test_restart_clears_series_of_vanished_vpa() {
        let registry = Registry::new();
        let recommendations = RecommendationMetrics::new(&registry).unwrap();
        let metrics = ExporterMetrics::new(&registry).unwrap();
        let mut informer = Informer::new(recommendations, metrics);

        informer.handle_event(Event::Applied(with_recommendation(vpa("web", "1"))));
        informer.handle_event(Event::Applied(with_recommendation(vpa("api", "1"))));
        informer.handle_event(Event::Restarted(vec![with_recommendation(vpa("web", "2"))]));

        let series: Vec<_> = registry
            .gather()
            .into_iter()
            .filter(|f| f.get_name() == METRIC_NAME)
            .flat_map(|f| f.get_metric().to_vec())
            .collect();
        assert_eq!(series.len(), 8);
        assert!(series.iter().all(|m| m
            .get_label()
            .iter()
            .any(|l| l.get_name() == "name" && l.get_value() == "web")));
    }
}
