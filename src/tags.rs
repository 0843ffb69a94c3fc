//! Tag composition (spec.md §4.3): merges the endpoint, metric, and global
//! tag layers with the (intentionally inverted) precedence
//! `endpoint < metric < global`, plus the two fixed `description`/`units`
//! tags appended beneath all three.

use crate::model::{MonitoredMetric, Tags};
use crate::token::{expand, MissingPolicy};

/// Build the lookup available to the endpoint and metric tag layers: the
/// endpoint's additional environment (pod attributes), plus the four
/// injected `METRIC:*` values. Per spec.md §4.3 this layer never sees OS
/// environment variables.
fn endpoint_metric_lookup<'a>(
    additional_environment: &'a Tags,
    metric: &'a MonitoredMetric,
    final_id: &'a str,
) -> impl Fn(&str) -> Option<String> + 'a {
    move |name: &str| match name {
        "METRIC:name" => Some(metric.name.clone()),
        "METRIC:id" => Some(final_id.to_owned()),
        "METRIC:units" => Some(metric.units.clone().unwrap_or_default()),
        "METRIC:description" => Some(metric.description.clone().unwrap_or_default()),
        other => additional_environment.get(other).cloned(),
    }
}

/// The global tag layer may read OS environment variables; nothing else.
fn global_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Compose the final tag set for one emitted series' metric definition.
///
/// `final_id` is the already fully-expanded id (post label-splitting), used
/// to satisfy the `METRIC:id` injected token.
pub fn compose_tags(
    endpoint_tags: &Tags,
    metric: &MonitoredMetric,
    global_tags: &Tags,
    additional_environment: &Tags,
    final_id: &str,
) -> Tags {
    let mut result = Tags::new();

    if let Some(description) = metric.description.as_deref() {
        if !description.is_empty() {
            result.insert("description".to_owned(), description.to_owned());
        }
    }
    if let Some(units) = metric.units.as_deref() {
        if !units.is_empty() {
            result.insert("units".to_owned(), units.to_owned());
        }
    }

    let local_lookup = endpoint_metric_lookup(additional_environment, metric, final_id);

    for (key, value) in endpoint_tags {
        result.insert(key.clone(), expand(value, MissingPolicy::Empty, &local_lookup));
    }
    for (key, value) in &metric.tags {
        result.insert(key.clone(), expand(value, MissingPolicy::Empty, &local_lookup));
    }
    for (key, value) in global_tags {
        result.insert(key.clone(), expand(value, MissingPolicy::Empty, global_lookup));
    }

    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::MetricType;

    fn metric(tags: Tags) -> MonitoredMetric {
        MonitoredMetric {
            name: "heap_used".to_owned(),
            id: None,
            metric_type: Some(MetricType::Gauge),
            units: Some("bytes".to_owned()),
            description: Some("heap bytes used".to_owned()),
            tags,
        }
    }

    #[test]
    fn test_precedence_global_wins_over_endpoint_and_metric() {
        std::env::set_var("TAGS_TEST_ENV", "prod");
        let mut endpoint_tags = Tags::new();
        endpoint_tags.insert("env".to_owned(), "test".to_owned());
        let mut metric_tags = Tags::new();
        metric_tags.insert("env".to_owned(), "metric-level".to_owned());
        let mut global_tags = Tags::new();
        global_tags.insert("env".to_owned(), "${TAGS_TEST_ENV}".to_owned());

        let m = metric(metric_tags);
        let result = compose_tags(&endpoint_tags, &m, &global_tags, &Tags::new(), "heap_used");
        assert_eq!(result.get("env"), Some(&"prod".to_owned()));
        std::env::remove_var("TAGS_TEST_ENV");
    }

    #[test]
    fn test_metric_wins_over_endpoint_when_global_silent() {
        let mut endpoint_tags = Tags::new();
        endpoint_tags.insert("env".to_owned(), "endpoint-level".to_owned());
        let mut metric_tags = Tags::new();
        metric_tags.insert("env".to_owned(), "metric-level".to_owned());

        let m = metric(metric_tags);
        let result = compose_tags(&endpoint_tags, &m, &Tags::new(), &Tags::new(), "heap_used");
        assert_eq!(result.get("env"), Some(&"metric-level".to_owned()));
    }

    #[test]
    fn test_fixed_tags_present_and_overridable() {
        let m = metric(Tags::new());
        let result = compose_tags(&Tags::new(), &m, &Tags::new(), &Tags::new(), "heap_used");
        assert_eq!(result.get("description"), Some(&"heap bytes used".to_owned()));
        assert_eq!(result.get("units"), Some(&"bytes".to_owned()));

        let mut endpoint_tags = Tags::new();
        endpoint_tags.insert("units".to_owned(), "MiB".to_owned());
        let result = compose_tags(&endpoint_tags, &m, &Tags::new(), &Tags::new(), "heap_used");
        assert_eq!(result.get("units"), Some(&"MiB".to_owned()));
    }

    #[test]
    fn test_injected_metric_tokens() {
        let mut metric_tags = Tags::new();
        metric_tags.insert("full_name".to_owned(), "${METRIC:name}/${METRIC:id}".to_owned());
        let m = metric(metric_tags);
        let result = compose_tags(&Tags::new(), &m, &Tags::new(), &Tags::new(), "final_id_123");
        assert_eq!(result.get("full_name"), Some(&"heap_used/final_id_123".to_owned()));
    }

    #[test]
    fn test_endpoint_metric_layer_cannot_read_os_env() {
        std::env::set_var("TAGS_TEST_SECRET", "leaked");
        let mut endpoint_tags = Tags::new();
        endpoint_tags.insert("x".to_owned(), "${TAGS_TEST_SECRET}".to_owned());
        let m = metric(Tags::new());
        let result = compose_tags(&endpoint_tags, &m, &Tags::new(), &Tags::new(), "id");
        assert_eq!(result.get("x"), Some(&String::new()));
        std::env::remove_var("TAGS_TEST_SECRET");
    }
}
