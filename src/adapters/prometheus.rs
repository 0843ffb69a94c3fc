//! The Prometheus adapter (spec.md §4.1.1): one HTTP GET per call, dispatched
//! to the text or binary-delimited decoder by response `Content-Type`.

use std::collections::HashMap;
use std::time::SystemTime;

use http::StatusCode;
use snafu::ResultExt;

use crate::http_client::SharedHttpClient;
use crate::model::{CollectedMetric, Datapoint, Endpoint, MetricDetails, MetricType};

use super::{PrometheusParseSnafu, PrometheusProtoSnafu, ScrapeError, TransportSnafu};

const ACCEPT_HEADER: &str =
    "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited, text/plain;version=0.0.4;q=0.8";

/// Unit suffixes recognized when a `MonitoredMetric` doesn't declare its own
/// `units`, per spec.md §4.1.1.
const UNIT_SUFFIXES: &[&str] = &["_seconds", "_bytes", "_total", "_ratio", "_percent"];

pub struct PrometheusAdapter {
    endpoint: Endpoint,
    client: SharedHttpClient,
}

impl PrometheusAdapter {
    pub fn new(endpoint: Endpoint, client: SharedHttpClient) -> Self {
        PrometheusAdapter { endpoint, client }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn scrape(&self) -> Result<Vec<CollectedMetric>, ScrapeError> {
        let families = self.fetch_families().await?;
        let now = SystemTime::now();

        Ok(families
            .into_iter()
            .map(|family| CollectedMetric {
                name: family.name,
                metric_type: map_kind(family.kind),
                tenant: self.endpoint.tenant.clone(),
                datapoints: family
                    .samples
                    .into_iter()
                    .map(|sample| Datapoint {
                        timestamp: now,
                        value: sample.value,
                        labels: sample.labels,
                    })
                    .collect(),
            })
            .collect())
    }

    pub async fn fetch_metric_details(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, MetricDetails>, ScrapeError> {
        let families = self.fetch_families().await?;
        let wanted: std::collections::HashSet<&str> = names.iter().map(String::as_str).collect();

        Ok(families
            .into_iter()
            .filter(|family| wanted.contains(family.name.as_str()))
            .map(|family| {
                let units = infer_units(&family.name);
                (
                    family.name,
                    MetricDetails {
                        description: family.help,
                        metric_type: Some(map_kind(family.kind)),
                        units,
                    },
                )
            })
            .collect())
    }

    async fn fetch_families(&self) -> Result<Vec<prometheus_parser::MetricFamily>, ScrapeError> {
        let uri: http::Uri = self
            .endpoint
            .address
            .to_url()
            .parse()
            .map_err(|_| ScrapeError::Transport {
                source: crate::http_client::TransportError::Status {
                    status: StatusCode::BAD_REQUEST,
                },
            })?;

        let response = self
            .client
            .get(uri, ACCEPT_HEADER, self.endpoint.credentials.as_ref())
            .await
            .context(TransportSnafu)?;

        if is_binary_delimited(response.content_type.as_deref()) {
            prometheus_parser::proto::decode_delimited(&response.body).context(PrometheusProtoSnafu)
        } else {
            let text = String::from_utf8_lossy(&response.body);
            prometheus_parser::parse_text(&text).context(PrometheusParseSnafu)
        }
    }
}

/// Dispatch on `Content-Type` (spec.md §4.1.1): the binary delimited form is
/// `application/vnd.google.protobuf;...`; everything else — including a
/// missing header, which some minimal exporters omit — is treated as the
/// text exposition format.
fn is_binary_delimited(content_type: Option<&str>) -> bool {
    content_type
        .map(|value| value.starts_with("application/vnd.google.protobuf"))
        .unwrap_or(false)
}

fn map_kind(kind: prometheus_parser::MetricKind) -> MetricType {
    match kind {
        prometheus_parser::MetricKind::Counter => MetricType::Counter,
        _ => MetricType::Gauge,
    }
}

fn infer_units(metric_name: &str) -> Option<String> {
    UNIT_SUFFIXES
        .iter()
        .find(|suffix| metric_name.ends_with(*suffix))
        .map(|suffix| suffix.trim_start_matches('_').to_owned())
}
