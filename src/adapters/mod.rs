//! The two protocol adapters (spec.md §4.1), dispatched through a closed,
//! two-variant tagged union rather than a trait object — per the design
//! note in spec.md §9, this is a closed set and will stay that way.

pub mod jolokia;
pub mod prometheus;

use std::collections::HashMap;

use snafu::Snafu;

use crate::http_client::{SharedHttpClient, TransportError};
use crate::model::{CollectedMetric, Endpoint, MetricDetails, Tags};

pub use jolokia::JolokiaAdapter;
pub use prometheus::PrometheusAdapter;

#[derive(Debug, Snafu)]
pub enum ScrapeError {
    #[snafu(display("scrape transport error: {}", source))]
    Transport { source: TransportError },
    #[snafu(display("failed to parse Prometheus exposition body: {}", source))]
    PrometheusParse { source: prometheus_parser::ParserError },
    #[snafu(display("failed to decode Prometheus protobuf body: {}", source))]
    PrometheusProto { source: prometheus_parser::proto::ProtoDecodeError },
    #[snafu(display("failed to parse Jolokia response body: {}", source))]
    JolokiaParse { source: serde_json::Error },
    #[snafu(display("invalid Jolokia metric name `{}`: {}", name, reason))]
    JolokiaMetricName { name: String, reason: String },
}

/// The closed set of scrape protocols. Each variant owns its endpoint copy
/// and a shared HTTP client handle; adapters carry no other mutable state
/// (spec.md §3 "Ownership").
pub enum Adapter {
    Prometheus(PrometheusAdapter),
    Jolokia(JolokiaAdapter),
}

impl Adapter {
    pub fn new(endpoint: Endpoint, client: SharedHttpClient) -> Self {
        match endpoint.endpoint_type {
            crate::model::EndpointType::Prometheus => Adapter::Prometheus(PrometheusAdapter::new(endpoint, client)),
            crate::model::EndpointType::Jolokia => Adapter::Jolokia(JolokiaAdapter::new(endpoint, client)),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Adapter::Prometheus(a) => a.endpoint().id.as_str(),
            Adapter::Jolokia(a) => a.endpoint().id.as_str(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Adapter::Prometheus(a) => a.endpoint(),
            Adapter::Jolokia(a) => a.endpoint(),
        }
    }

    pub fn additional_environment(&self) -> &Tags {
        &self.endpoint().additional_environment
    }

    /// Perform exactly one HTTP request and return the normalized samples.
    pub async fn scrape(&self) -> Result<Vec<CollectedMetric>, ScrapeError> {
        match self {
            Adapter::Prometheus(a) => a.scrape().await,
            Adapter::Jolokia(a) => a.scrape().await,
        }
    }

    /// Fetch adapter-level metadata (type/help/units) for a set of metric
    /// names, used when declaring definitions (spec.md §4.2 "Definition
    /// declaration").
    pub async fn fetch_metric_details(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, MetricDetails>, ScrapeError> {
        match self {
            Adapter::Prometheus(a) => a.fetch_metric_details(names).await,
            Adapter::Jolokia(a) => a.fetch_metric_details(names).await,
        }
    }
}
