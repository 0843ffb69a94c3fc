//! Config-file parsing and environment-variable overrides (spec.md §6).
//! Deep behavior here (CLI flag handling, process bootstrap) is an
//! out-of-scope collaborator; what's implemented is the minimal,
//! idiomatic realization needed to wire a real binary together —
//! `serde_yaml` for both the static agent config and the pod-embedded
//! scrape-config document, matching the teacher's own `serde` + `serde_yaml`
//! pair.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::model::{Credentials, Endpoint, EndpointAddress, EndpointType, MonitoredMetric, Tags};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {}", path.display(), source))]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[snafu(display("failed to parse YAML: {}", source))]
    ParseYaml { source: serde_yaml::Error },
    #[snafu(display("endpoint must specify either `url` or `protocol`+`port`+`path`, not both"))]
    ConflictingAddress,
    #[snafu(display("endpoint must specify either `url` or `protocol`+`port`+`path`"))]
    MissingAddress,
    #[snafu(display("invalid collection_interval `{}`: {}", value, source))]
    InvalidInterval { value: String, source: humantime::DurationError },
}

fn default_true() -> bool {
    true
}

fn default_min_interval() -> String {
    "15s".to_owned()
}

fn default_default_interval() -> String {
    "60s".to_owned()
}

fn default_scrape_volume_name() -> String {
    "collector-agent-scrape-config".to_owned()
}

/// The per-endpoint YAML schema, shared by the static agent config's
/// `static_endpoints` list and the pod-embedded scrape-config document
/// (spec.md §6 "Config document schema").
#[derive(Debug, Clone, Deserialize)]
pub struct RawEndpoint {
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    pub protocol: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub collection_interval: Option<String>,
    pub credentials: Option<RawCredentials>,
    pub tenant: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub metrics: Vec<RawMonitoredMetric>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCredentials {
    Token { token: String },
    Basic { username: String, password: String },
}

impl From<RawCredentials> for Credentials {
    fn from(raw: RawCredentials) -> Self {
        match raw {
            RawCredentials::Token { token } => Credentials::Bearer { token },
            RawCredentials::Basic { username, password } => Credentials::Basic { username, password },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMonitoredMetric {
    pub name: String,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: Option<crate::model::MetricType>,
    pub units: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

impl From<RawMonitoredMetric> for MonitoredMetric {
    fn from(raw: RawMonitoredMetric) -> Self {
        MonitoredMetric {
            name: raw.name,
            id: raw.id,
            metric_type: raw.metric_type,
            units: raw.units,
            description: raw.description,
            tags: raw.tags,
        }
    }
}

/// The pod-embedded scrape-config document (spec.md §4.5, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsDocument {
    #[serde(default)]
    pub endpoints: Vec<RawEndpoint>,
}

impl EndpointsDocument {
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).context(ParseYamlSnafu)
    }
}

impl RawEndpoint {
    /// Resolve into the runtime `Endpoint` the collector manager consumes.
    /// `id` is the scheduler key built per spec.md §3 by the caller
    /// (static-config sentinel form, or the orchestrator-derived
    /// `namespace|pod|type|address` form).
    pub fn into_endpoint(
        self,
        id: String,
        default_tenant: &str,
        additional_environment: Tags,
    ) -> Result<Endpoint, ConfigError> {
        let address = match (self.url, self.protocol, self.port, self.path) {
            (Some(url), None, None, None) => EndpointAddress::Url(url),
            (None, Some(protocol), Some(port), Some(path)) => EndpointAddress::Parts {
                protocol,
                host: String::new(),
                port,
                path,
            },
            (None, None, None, None) => return MissingAddressSnafu.fail(),
            _ => return ConflictingAddressSnafu.fail(),
        };

        let collection_interval = self
            .collection_interval
            .map(|value| {
                humantime::parse_duration(&value)
                    .context(InvalidIntervalSnafu { value: value.clone() })
            })
            .transpose()?;

        Ok(Endpoint {
            id,
            endpoint_type: self.endpoint_type,
            address,
            collection_interval,
            credentials: self.credentials.map(Into::into),
            tenant: self.tenant.unwrap_or_else(|| default_tenant.to_owned()),
            enabled: self.enabled,
            tags: self.tags,
            metrics: self.metrics.into_iter().map(Into::into).collect(),
            additional_environment,
        })
    }

    /// Fill in the pod's own IP as `host` for the `{protocol, port, path}`
    /// form, and build the scheduler id the way spec.md §3 specifies for
    /// orchestrator-discovered endpoints.
    pub fn scheduler_id(&self, namespace: &str, pod: &str, host_ip: &str) -> String {
        let trailing = match (&self.url, &self.protocol, &self.port, &self.path) {
            (Some(url), _, _, _) => url.clone(),
            (None, Some(protocol), Some(port), Some(path)) => format!("{protocol}://{host_ip}:{port}{path}"),
            _ => String::new(),
        };
        format!("{namespace}|{pod}|{:?}|{trailing}", self.endpoint_type)
    }
}

/// Sentinel prefix for statically configured endpoints (spec.md §3
/// "Endpoint identity").
pub const STATIC_ENDPOINT_PREFIX: &str = "static";

pub fn static_scheduler_id(raw: &RawEndpoint) -> String {
    let trailing = raw
        .url
        .clone()
        .unwrap_or_else(|| format!("{}://:{}{}", raw.protocol.as_deref().unwrap_or(""), raw.port.unwrap_or(0), raw.path.as_deref().unwrap_or("")));
    format!("{STATIC_ENDPOINT_PREFIX}|{:?}|{trailing}", raw.endpoint_type)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    pub tenant: String,
    pub ca_path: Option<PathBuf>,
    pub credentials: Option<RawCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval: String,
    #[serde(default = "default_default_interval")]
    pub default_interval: String,
    #[serde(default)]
    pub metric_id_prefix: String,
    #[serde(default)]
    pub global_tags: Tags,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            min_interval: default_min_interval(),
            default_interval: default_default_interval(),
            metric_id_prefix: String::new(),
            global_tags: Tags::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesConfig {
    pub master_url: Option<String>,
    pub namespace: String,
    pub pod_name: Option<String>,
    pub token: Option<String>,
    pub ca_path: Option<PathBuf>,
    #[serde(default = "default_scrape_volume_name")]
    pub scrape_config_volume_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bind_address: Option<String>,
    pub status_basic_auth: Option<RawCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub static_endpoints: Vec<RawEndpoint>,
    #[serde(default)]
    pub collector: CollectorConfig,
    pub kubernetes: Option<KubernetesConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AgentConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).context(ReadFileSnafu { path: path.to_path_buf() })?;
        let mut config: AgentConfig = serde_yaml::from_str(&raw).context(ParseYamlSnafu)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables recognized at startup override the equivalent
    /// config path (spec.md §6, exhaustive list in the agent's schema —
    /// abbreviated here to the fields this crate actually consumes).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_SERVER_URL") {
            self.server.url = value;
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_SERVER_TENANT") {
            self.server.tenant = value;
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_SERVER_TOKEN") {
            self.server.credentials = Some(RawCredentials::Token { token: value });
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_SERVER_CA_PATH") {
            self.server.ca_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_MIN_INTERVAL") {
            self.collector.min_interval = value;
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_DEFAULT_INTERVAL") {
            self.collector.default_interval = value;
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_METRIC_ID_PREFIX") {
            self.collector.metric_id_prefix = value;
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_TELEMETRY_BIND_ADDRESS") {
            self.telemetry.bind_address = Some(value);
            self.telemetry.enabled = true;
        }
        if let Ok(value) = std::env::var("COLLECTOR_AGENT_TELEMETRY_ENABLED") {
            self.telemetry.enabled = value == "true" || value == "1";
        }

        if let Some(kubernetes) = self.kubernetes.as_mut() {
            if let Ok(value) = std::env::var("COLLECTOR_AGENT_K8S_MASTER_URL") {
                kubernetes.master_url = Some(value);
            }
            if let Ok(value) = std::env::var("COLLECTOR_AGENT_K8S_NAMESPACE") {
                kubernetes.namespace = value;
            }
            if let Ok(value) = std::env::var("COLLECTOR_AGENT_K8S_POD_NAME") {
                kubernetes.pod_name = Some(value);
            }
            if let Ok(value) = std::env::var("COLLECTOR_AGENT_K8S_TOKEN") {
                kubernetes.token = Some(value);
            }
            if let Ok(value) = std::env::var("COLLECTOR_AGENT_K8S_CA_PATH") {
                kubernetes.ca_path = Some(PathBuf::from(value));
            }
        }
    }

    pub fn min_interval(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.collector.min_interval).context(InvalidIntervalSnafu {
            value: self.collector.min_interval.clone(),
        })
    }

    pub fn default_interval(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.collector.default_interval).context(InvalidIntervalSnafu {
            value: self.collector.default_interval.clone(),
        })
    }
}

/// Build the endpoint list described once at startup by
/// `AgentConfig.static_endpoints`, keyed with the sentinel prefix form
/// (spec.md §3 "Endpoint identity").
pub fn resolve_static_endpoints(config: &AgentConfig) -> Result<Vec<Endpoint>, ConfigError> {
    config
        .static_endpoints
        .iter()
        .cloned()
        .map(|raw| {
            let id = static_scheduler_id(&raw);
            raw.into_endpoint(id, &config.server.tenant, Tags::new())
        })
        .collect()
}

/// Derive the per-pod "additional environment" (spec.md §4.5): node/pod
/// attributes exposed to id/tag token expansion, plus `label[key]` and a
/// pre-joined `labels` string.
pub fn pod_additional_environment(
    node_name: &str,
    node_uid: &str,
    namespace_name: &str,
    namespace_uid: &str,
    pod_name: &str,
    pod_uid: &str,
    pod_ip: &str,
    host_ip: &str,
    hostname: &str,
    subdomain: &str,
    labels: &HashMap<String, String>,
) -> Tags {
    let mut environment = Tags::new();
    environment.insert("node-name".to_owned(), node_name.to_owned());
    environment.insert("node-uid".to_owned(), node_uid.to_owned());
    environment.insert("namespace-name".to_owned(), namespace_name.to_owned());
    environment.insert("namespace-uid".to_owned(), namespace_uid.to_owned());
    environment.insert("pod-name".to_owned(), pod_name.to_owned());
    environment.insert("pod-uid".to_owned(), pod_uid.to_owned());
    environment.insert("pod-ip".to_owned(), pod_ip.to_owned());
    environment.insert("host-ip".to_owned(), host_ip.to_owned());
    environment.insert("hostname".to_owned(), hostname.to_owned());
    environment.insert("subdomain".to_owned(), subdomain.to_owned());

    for (key, value) in labels {
        environment.insert(format!("label[{key}]"), value.clone());
    }
    let mut joined: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    joined.sort();
    environment.insert("labels".to_owned(), joined.join(","));

    environment
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_endpoints_document() {
        let yaml = r#"
endpoints:
  - type: prometheus
    url: "http://localhost:9090/metrics"
    tenant: t1
    metrics:
      - name: up
        type: gauge
"#;
        let document = EndpointsDocument::parse(yaml).unwrap();
        assert_eq!(document.endpoints.len(), 1);
        assert_eq!(document.endpoints[0].metrics[0].name, "up");
    }

    #[test]
    fn test_conflicting_address_rejected() {
        let raw = RawEndpoint {
            endpoint_type: EndpointType::Prometheus,
            protocol: Some("http".to_owned()),
            port: Some(9090),
            path: Some("/metrics".to_owned()),
            url: Some("http://localhost:9090/metrics".to_owned()),
            collection_interval: None,
            credentials: None,
            tenant: None,
            enabled: true,
            tags: Tags::new(),
            metrics: vec![],
        };
        let error = raw.into_endpoint("id".to_owned(), "t1", Tags::new()).unwrap_err();
        assert!(matches!(error, ConfigError::ConflictingAddress));
    }

    #[test]
    fn test_missing_address_rejected() {
        let raw = RawEndpoint {
            endpoint_type: EndpointType::Prometheus,
            protocol: None,
            port: None,
            path: None,
            url: None,
            collection_interval: None,
            credentials: None,
            tenant: None,
            enabled: true,
            tags: Tags::new(),
            metrics: vec![],
        };
        let error = raw.into_endpoint("id".to_owned(), "t1", Tags::new()).unwrap_err();
        assert!(matches!(error, ConfigError::MissingAddress));
    }

    #[test]
    fn test_pod_additional_environment_includes_labels() {
        let mut labels = HashMap::new();
        labels.insert("app".to_owned(), "web".to_owned());
        let environment =
            pod_additional_environment("n1", "nu1", "ns1", "nsu1", "p1", "pu1", "10.0.0.1", "10.0.0.2", "h1", "sub1", &labels);
        assert_eq!(environment.get("label[app]"), Some(&"web".to_owned()));
        assert_eq!(environment.get("labels"), Some(&"app=web".to_owned()));
        assert_eq!(environment.get("pod-name"), Some(&"p1".to_owned()));
    }
}
