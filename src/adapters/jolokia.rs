//! The Jolokia adapter (spec.md §4.1.2): one bulk-read JSON POST per call.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use tracing::warn;

use crate::http_client::SharedHttpClient;
use crate::model::{CollectedMetric, Datapoint, Endpoint, MetricDetails, MetricType, Tags};

use super::{JolokiaMetricNameSnafu, JolokiaParseSnafu, ScrapeError, TransportSnafu};

pub struct JolokiaAdapter {
    endpoint: Endpoint,
    client: SharedHttpClient,
}

#[derive(Serialize)]
struct ReadRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    mbean: String,
    attribute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Deserialize)]
struct ReadResponse {
    status: i64,
    #[serde(default)]
    value: Option<Value>,
}

/// A parsed `mbean-object-name#attribute(#composite-key)?` metric name
/// (spec.md §4.1.2).
struct ParsedName {
    mbean: String,
    attribute: String,
    composite_key: Option<String>,
}

impl ParsedName {
    fn parse(raw: &str) -> Result<Self, ScrapeError> {
        let mut parts = raw.splitn(3, '#');
        let mbean = parts
            .next()
            .filter(|s| !s.is_empty())
            .with_context(|| JolokiaMetricNameSnafu {
                name: raw.to_owned(),
                reason: "missing mbean object name before '#'".to_owned(),
            })?;
        let attribute = parts
            .next()
            .filter(|s| !s.is_empty())
            .with_context(|| JolokiaMetricNameSnafu {
                name: raw.to_owned(),
                reason: "missing '#attribute' segment".to_owned(),
            })?;
        let composite_key = parts.next().map(str::to_owned);

        Ok(ParsedName {
            mbean: mbean.to_owned(),
            attribute: attribute.to_owned(),
            composite_key,
        })
    }

    fn into_request(self) -> ReadRequest {
        ReadRequest {
            kind: "read",
            mbean: self.mbean,
            attribute: self.attribute,
            path: self.composite_key,
        }
    }
}

impl JolokiaAdapter {
    pub fn new(endpoint: Endpoint, client: SharedHttpClient) -> Self {
        JolokiaAdapter { endpoint, client }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn scrape(&self) -> Result<Vec<CollectedMetric>, ScrapeError> {
        if self.endpoint.metrics.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<&str> = self.endpoint.metrics.iter().map(|m| m.name.as_str()).collect();
        let parsed: Vec<(String, ReadRequest)> = names
            .iter()
            .map(|name| ParsedName::parse(name).map(|p| ((*name).to_owned(), p.into_request())))
            .collect::<Result<_, _>>()?;

        let requests: Vec<&ReadRequest> = parsed.iter().map(|(_, request)| request).collect();

        let body = serde_json::to_vec(&requests).expect("ReadRequest serialization is infallible");
        let uri: http::Uri = self.endpoint.address.to_url().parse().map_err(|_| ScrapeError::Transport {
            source: crate::http_client::TransportError::Status {
                status: http::StatusCode::BAD_REQUEST,
            },
        })?;

        let response = self
            .client
            .post_json(uri, body.into(), self.endpoint.credentials.as_ref())
            .await
            .context(TransportSnafu)?;

        let responses: Vec<ReadResponse> = serde_json::from_slice(&response.body).context(JolokiaParseSnafu)?;
        let now = SystemTime::now();

        let mut collected = Vec::with_capacity(responses.len());
        for ((name, _), entry) in parsed.iter().zip(responses.into_iter()) {
            if entry.status != 200 {
                warn!(metric = %name, status = entry.status, "Jolokia read entry failed; dropping this entry only.");
                continue;
            }
            let value = match entry.value.as_ref().and_then(Value::as_f64) {
                Some(value) => value,
                None => {
                    warn!(metric = %name, "Jolokia read entry returned a non-numeric or missing value; dropping.");
                    continue;
                }
            };

            let metric_type = self
                .endpoint
                .metric_named(name)
                .and_then(|m| m.metric_type)
                .unwrap_or(MetricType::Gauge);

            collected.push(CollectedMetric {
                name: name.clone(),
                metric_type,
                tenant: self.endpoint.tenant.clone(),
                datapoints: vec![Datapoint {
                    timestamp: now,
                    value,
                    labels: Tags::new(),
                }],
            });
        }

        Ok(collected)
    }

    /// Jolokia carries no metadata endpoint analogous to Prometheus'
    /// `# HELP`/`# TYPE` lines — every field comes back empty, so the
    /// manager's definition builder falls through entirely to config
    /// (spec.md §4.1.2).
    pub async fn fetch_metric_details(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, MetricDetails>, ScrapeError> {
        Ok(names
            .iter()
            .map(|name| (name.clone(), MetricDetails::default()))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_name_without_composite_key() {
        let parsed = ParsedName::parse("java.lang:type=Memory#HeapMemoryUsage").unwrap();
        assert_eq!(parsed.mbean, "java.lang:type=Memory");
        assert_eq!(parsed.attribute, "HeapMemoryUsage");
        assert_eq!(parsed.composite_key, None);
    }

    #[test]
    fn test_parse_name_with_composite_key() {
        let parsed = ParsedName::parse("java.lang:type=Memory#HeapMemoryUsage#used").unwrap();
        assert_eq!(parsed.mbean, "java.lang:type=Memory");
        assert_eq!(parsed.attribute, "HeapMemoryUsage");
        assert_eq!(parsed.composite_key.as_deref(), Some("used"));
    }

    #[test]
    fn test_parse_name_missing_attribute_errors() {
        let error = ParsedName::parse("java.lang:type=Memory").unwrap_err();
        assert!(matches!(error, ScrapeError::JolokiaMetricName { .. }));
    }

    #[test]
    fn test_into_request_maps_composite_key_to_path() {
        let parsed = ParsedName::parse("mbean#attr#key").unwrap();
        let request = parsed.into_request();
        assert_eq!(request.mbean, "mbean");
        assert_eq!(request.attribute, "attr");
        assert_eq!(request.path.as_deref(), Some("key"));
    }
}
