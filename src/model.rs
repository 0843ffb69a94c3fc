//! Core data model shared by the adapters, the identity expander, and the
//! collector manager.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Tag set attached to a datapoint, a metric definition, or an endpoint.
pub type Tags = BTreeMap<String, String>;

/// The two scrape protocols the collector engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Prometheus,
    Jolokia,
}

/// The two metric types a `MonitoredMetric` (and everything derived from it)
/// may carry. Histograms and summaries never reach this layer — see
/// `prometheus-parser`'s `proto` module for why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
}

/// Either a bearer token or a username/password pair. Bearer takes
/// precedence over basic auth when both are somehow present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    Bearer { token: String },
    Basic { username: String, password: String },
}

/// Either an absolute URL, or the `{protocol, host, port, path}` form used by
/// orchestrator-discovered endpoints. Exactly one of the two is ever
/// populated for a given `Endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    Url(String),
    Parts {
        protocol: String,
        host: String,
        port: u16,
        path: String,
    },
}

impl EndpointAddress {
    pub fn to_url(&self) -> String {
        match self {
            EndpointAddress::Url(url) => url.clone(),
            EndpointAddress::Parts {
                protocol,
                host,
                port,
                path,
            } => format!("{protocol}://{host}:{port}{path}"),
        }
    }

    pub fn is_https(&self) -> bool {
        match self {
            EndpointAddress::Url(url) => url.starts_with("https://"),
            EndpointAddress::Parts { protocol, .. } => protocol == "https",
        }
    }
}

/// One scrape target: its address, how often to poll it, and the metrics it
/// declares.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: String,
    pub endpoint_type: EndpointType,
    pub address: EndpointAddress,
    pub collection_interval: Option<Duration>,
    pub credentials: Option<Credentials>,
    pub tenant: String,
    pub enabled: bool,
    pub tags: Tags,
    pub metrics: Vec<MonitoredMetric>,
    /// Pod attributes for orchestrator-discovered endpoints (node name, pod
    /// name, labels, ...); empty for statically configured ones. Exposed to
    /// id/tag token expansion as the endpoint's "additional environment".
    pub additional_environment: Tags,
}

impl Endpoint {
    /// Look up a declared metric by its protocol-native name.
    pub fn metric_named(&self, name: &str) -> Option<&MonitoredMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// One entry in an endpoint's metric list, as declared in config or the
/// pod-embedded scrape document.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredMetric {
    pub name: String,
    pub id: Option<String>,
    pub metric_type: Option<MetricType>,
    pub units: Option<String>,
    pub description: Option<String>,
    pub tags: Tags,
}

impl MonitoredMetric {
    /// A metric config fabricated when an endpoint's metric list is empty —
    /// "collect everything the adapter returns, named after itself."
    pub fn synthetic(name: &str, metric_type: MetricType) -> Self {
        MonitoredMetric {
            name: name.to_owned(),
            id: Some(name.to_owned()),
            metric_type: Some(metric_type),
            units: None,
            description: None,
            tags: Tags::new(),
        }
    }
}

/// One sample as returned by an adapter, before identity expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub timestamp: SystemTime,
    pub value: f64,
    pub labels: Tags,
}

/// Everything an adapter produced for one protocol-native metric name during
/// a single scrape cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedMetric {
    pub name: String,
    pub metric_type: MetricType,
    pub tenant: String,
    pub datapoints: Vec<Datapoint>,
}

/// Adapter-supplied metadata for a metric name, independent of any one
/// scrape's datapoints — used to fill in a `MetricDefinitionDeclaration`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricDetails {
    pub description: Option<String>,
    pub metric_type: Option<MetricType>,
    pub units: Option<String>,
}

/// Output of the identity expander: a fully expanded id with its datapoints
/// still attached, ready to be forwarded to the datapoint sink channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSeries {
    pub id: String,
    pub tenant: String,
    pub metric_type: MetricType,
    pub datapoints: Vec<Datapoint>,
    pub tags: Tags,
}

/// A metric-definition record: announces an id's type and tags to the sink,
/// at most once per (endpoint, id) for the life of a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinitionDeclaration {
    pub tenant: String,
    pub metric_type: MetricType,
    pub id: String,
    pub tags: Tags,
}
