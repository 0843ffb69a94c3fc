//! The identity expander (spec.md §4.2): a pure transformation from one
//! scrape cycle's `CollectedMetric`s into the `EmittedSeries` batch
//! forwarded to the sink, plus the set of metric identities the cycle
//! touched (for the caller to diff against its declared-definitions set).

use std::collections::BTreeSet;

use tracing::warn;

use crate::model::{CollectedMetric, Datapoint, EmittedSeries, Endpoint, MonitoredMetric, Tags};
use crate::tags::compose_tags;
use crate::token::{expand, unresolved_tokens, MissingPolicy};

/// One metric identity touched by a cycle — the final expanded id, together
/// with the `MonitoredMetric` config that produced it (needed downstream to
/// fetch adapter metadata and compose the definition's tags).
#[derive(Debug, Clone)]
pub struct ExpandedMetric {
    pub final_id: String,
    pub metric: MonitoredMetric,
}

#[derive(Debug, Default)]
pub struct ExpansionOutput {
    pub series: Vec<EmittedSeries>,
    pub metrics: Vec<ExpandedMetric>,
}

/// Run the full expansion pipeline for one scrape cycle's worth of
/// collected metrics.
///
/// `global_tags` and `metric_id_prefix` come from the agent's own config,
/// not the endpoint — see spec.md §4.3 and §4.2.
pub fn expand_cycle(
    endpoint: &Endpoint,
    global_tags: &Tags,
    metric_id_prefix: &str,
    collected: &[CollectedMetric],
) -> ExpansionOutput {
    let mut output = ExpansionOutput::default();
    let mut seen_ids = BTreeSet::new();

    for sample in collected {
        let metric = match resolve_metric(endpoint, sample) {
            Some(metric) => metric,
            None => {
                warn!(
                    metric = %sample.name,
                    endpoint_id = %endpoint.id,
                    "Collected metric is not in the endpoint's declared metric list; dropping."
                );
                continue;
            }
        };

        let base_id = build_base_id(endpoint, metric_id_prefix, &metric);
        let label_keys: BTreeSet<&str> = sample
            .datapoints
            .iter()
            .flat_map(|dp| dp.labels.keys().map(String::as_str))
            .collect();

        let templated = !unresolved_tokens(&base_id).is_empty();

        if !templated && label_keys.is_empty() {
            // Case 4: plain id, no labels — one series, all datapoints.
            emit(
                endpoint,
                global_tags,
                &metric,
                base_id,
                sample.datapoints.clone(),
                sample.tenant.clone(),
                sample.metric_type,
                &mut output,
                &mut seen_ids,
            );
            continue;
        }

        let template = if templated {
            base_id
        } else {
            // Case 2: plain id with labeled datapoints — rewrite using the
            // sorted union of label keys so the id is stable regardless of
            // datapoint ordering (spec.md §8 "Id stability").
            let mut keys: Vec<&str> = label_keys.iter().copied().collect();
            keys.sort_unstable();
            let placeholders = keys
                .iter()
                .map(|k| format!("{k}=${{{k}}}"))
                .collect::<Vec<_>>()
                .join(",");
            format!("{base_id}{{{placeholders}}}")
        };

        // Case 3: templated id — one series per datapoint, tokens resolved
        // against that datapoint's own labels; missing ones go empty.
        for datapoint in &sample.datapoints {
            let final_id = expand(&template, MissingPolicy::Empty, |k| datapoint.labels.get(k).cloned());
            emit(
                endpoint,
                global_tags,
                &metric,
                final_id,
                vec![datapoint.clone()],
                sample.tenant.clone(),
                sample.metric_type,
                &mut output,
                &mut seen_ids,
            );
        }
    }

    output
}

#[allow(clippy::too_many_arguments)]
fn emit(
    endpoint: &Endpoint,
    global_tags: &Tags,
    metric: &MonitoredMetric,
    final_id: String,
    datapoints: Vec<Datapoint>,
    tenant: String,
    metric_type: crate::model::MetricType,
    output: &mut ExpansionOutput,
    seen_ids: &mut BTreeSet<String>,
) {
    let tags = compose_tags(&endpoint.tags, metric, global_tags, &endpoint.additional_environment, &final_id);

    if seen_ids.insert(final_id.clone()) {
        output.metrics.push(ExpandedMetric {
            final_id: final_id.clone(),
            metric: metric.clone(),
        });
    }

    output.series.push(EmittedSeries {
        id: final_id,
        tenant,
        metric_type,
        datapoints,
        tags,
    });
}

/// Find the `MonitoredMetric` config for a collected sample, or fabricate a
/// synthetic one when the endpoint declares no metric list at all
/// (spec.md §4.2 "Matching").
fn resolve_metric(endpoint: &Endpoint, sample: &CollectedMetric) -> Option<MonitoredMetric> {
    if endpoint.metrics.is_empty() {
        return Some(MonitoredMetric::synthetic(&sample.name, sample.metric_type));
    }
    endpoint.metric_named(&sample.name).cloned()
}

/// Expand the global prefix (OS-env + additional env) and the metric's own
/// id template (additional env only), then concatenate. Unresolved tokens
/// are preserved literally at this stage so the caller can tell a plain id
/// from a templated one.
fn build_base_id(endpoint: &Endpoint, metric_id_prefix: &str, metric: &MonitoredMetric) -> String {
    let prefix = expand(metric_id_prefix, MissingPolicy::PreserveLiteral, |name| {
        endpoint
            .additional_environment
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    });

    let id_template = metric.id.clone().unwrap_or_else(|| metric.name.clone());
    let id = expand(&id_template, MissingPolicy::PreserveLiteral, |name| {
        endpoint.additional_environment.get(name).cloned()
    });

    format!("{prefix}{id}")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{EndpointAddress, EndpointType, MetricType};
    use std::time::SystemTime;

    fn endpoint(metrics: Vec<MonitoredMetric>) -> Endpoint {
        Endpoint {
            id: "static:prometheus:http://localhost/metrics".to_owned(),
            endpoint_type: EndpointType::Prometheus,
            address: EndpointAddress::Url("http://localhost/metrics".to_owned()),
            collection_interval: None,
            credentials: None,
            tenant: "t1".to_owned(),
            enabled: true,
            tags: Tags::new(),
            metrics,
            additional_environment: Tags::new(),
        }
    }

    fn dp(value: f64, labels: &[(&str, &str)]) -> Datapoint {
        Datapoint {
            timestamp: SystemTime::UNIX_EPOCH,
            value,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_scenario_1_default_template_from_sorted_labels() {
        let metrics = vec![
            MonitoredMetric {
                name: "foo".into(),
                id: None,
                metric_type: Some(MetricType::Gauge),
                units: None,
                description: None,
                tags: Tags::new(),
            },
            MonitoredMetric {
                name: "bar".into(),
                id: None,
                metric_type: Some(MetricType::Gauge),
                units: None,
                description: None,
                tags: Tags::new(),
            },
        ];
        let endpoint = endpoint(metrics);
        let collected = vec![
            CollectedMetric {
                name: "foo".into(),
                metric_type: MetricType::Gauge,
                tenant: "t1".into(),
                datapoints: vec![dp(1.0, &[])],
            },
            CollectedMetric {
                name: "bar".into(),
                metric_type: MetricType::Gauge,
                tenant: "t1".into(),
                datapoints: vec![dp(2.0, &[("k", "a")]), dp(3.0, &[("k", "b")])],
            },
        ];

        let output = expand_cycle(&endpoint, &Tags::new(), "", &collected);
        let mut ids: Vec<&str> = output.series.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["bar{k=a}", "bar{k=b}", "foo"]);
    }

    #[test]
    fn test_scenario_2_explicit_id_template() {
        let metrics = vec![
            MonitoredMetric {
                name: "foo".into(),
                id: None,
                metric_type: Some(MetricType::Gauge),
                units: None,
                description: None,
                tags: Tags::new(),
            },
            MonitoredMetric {
                name: "bar".into(),
                id: Some("bar_${k}".into()),
                metric_type: Some(MetricType::Gauge),
                units: None,
                description: None,
                tags: Tags::new(),
            },
        ];
        let endpoint = endpoint(metrics);
        let collected = vec![
            CollectedMetric {
                name: "foo".into(),
                metric_type: MetricType::Gauge,
                tenant: "t1".into(),
                datapoints: vec![dp(1.0, &[])],
            },
            CollectedMetric {
                name: "bar".into(),
                metric_type: MetricType::Gauge,
                tenant: "t1".into(),
                datapoints: vec![dp(2.0, &[("k", "a")]), dp(3.0, &[("k", "b")])],
            },
        ];

        let output = expand_cycle(&endpoint, &Tags::new(), "", &collected);
        let mut ids: Vec<&str> = output.series.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["bar_a", "bar_b", "foo"]);
    }

    #[test]
    fn test_undeclared_metric_dropped_with_declared_list() {
        let endpoint = endpoint(vec![MonitoredMetric {
            name: "foo".into(),
            id: None,
            metric_type: Some(MetricType::Gauge),
            units: None,
            description: None,
            tags: Tags::new(),
        }]);
        let collected = vec![CollectedMetric {
            name: "unlisted".into(),
            metric_type: MetricType::Gauge,
            tenant: "t1".into(),
            datapoints: vec![dp(1.0, &[])],
        }];
        let output = expand_cycle(&endpoint, &Tags::new(), "", &collected);
        assert!(output.series.is_empty());
    }

    #[test]
    fn test_synthetic_metric_when_metric_list_empty() {
        let endpoint = endpoint(vec![]);
        let collected = vec![CollectedMetric {
            name: "anything".into(),
            metric_type: MetricType::Counter,
            tenant: "t1".into(),
            datapoints: vec![dp(1.0, &[])],
        }];
        let output = expand_cycle(&endpoint, &Tags::new(), "", &collected);
        assert_eq!(output.series.len(), 1);
        assert_eq!(output.series[0].id, "anything");
    }

    #[test]
    fn test_id_stability_regardless_of_datapoint_order() {
        let metric = MonitoredMetric {
            name: "bar".into(),
            id: None,
            metric_type: Some(MetricType::Gauge),
            units: None,
            description: None,
            tags: Tags::new(),
        };
        let endpoint = endpoint(vec![metric]);

        let forward = vec![CollectedMetric {
            name: "bar".into(),
            metric_type: MetricType::Gauge,
            tenant: "t1".into(),
            datapoints: vec![dp(1.0, &[("b", "2"), ("a", "1")])],
        }];
        let reversed = vec![CollectedMetric {
            name: "bar".into(),
            metric_type: MetricType::Gauge,
            tenant: "t1".into(),
            datapoints: vec![dp(1.0, &[("a", "1"), ("b", "2")])],
        }];

        let out1 = expand_cycle(&endpoint, &Tags::new(), "", &forward);
        let out2 = expand_cycle(&endpoint, &Tags::new(), "", &reversed);
        assert_eq!(out1.series[0].id, out2.series[0].id);
        assert_eq!(out1.series[0].id, "bar{a=1,b=2}");
    }

    #[test]
    fn test_prefix_expansion_reads_os_env() {
        std::env::set_var("EXPANDER_TEST_PREFIX", "acme");
        let metric = MonitoredMetric {
            name: "foo".into(),
            id: None,
            metric_type: Some(MetricType::Gauge),
            units: None,
            description: None,
            tags: Tags::new(),
        };
        let endpoint = endpoint(vec![metric]);
        let collected = vec![CollectedMetric {
            name: "foo".into(),
            metric_type: MetricType::Gauge,
            tenant: "t1".into(),
            datapoints: vec![dp(1.0, &[])],
        }];
        let output = expand_cycle(&endpoint, &Tags::new(), "${EXPANDER_TEST_PREFIX}.", &collected);
        assert_eq!(output.series[0].id, "acme.foo");
        std::env::remove_var("EXPANDER_TEST_PREFIX");
    }
}
