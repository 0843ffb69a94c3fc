//! Kubernetes collaboration (spec.md §4.5): a pod watch plus the
//! `ConfigMap` lookups a pod's scrape-config volume points at. Grounded on
//! the `kube` + `k8s-openapi` pair Cargo.toml already carries; the
//! reconnect/backoff policy itself is `kube::runtime::watcher`'s, same as
//! any consumer of that crate would get.

use std::path::Path;

use futures_util::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::Api;
use kube::config::{AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};
use kube::runtime::watcher;
use kube::runtime::watcher::Event as WatchEvent;
use kube::{Client, Config};
use snafu::{ResultExt, Snafu};

use crate::config::KubernetesConfig;

#[derive(Debug, Snafu)]
pub enum K8sError {
    #[snafu(display("failed to read CA certificate at {}: {}", path.display(), source))]
    ReadCa { path: std::path::PathBuf, source: std::io::Error },
    #[snafu(display("failed to build kube client config: {}", source))]
    BuildConfig { source: kube::Error },
    #[snafu(display("failed to build kube client: {}", source))]
    BuildClient { source: kube::Error },
    #[snafu(display("failed to fetch config map {}/{}: {}", namespace, name, source))]
    FetchConfigMap {
        namespace: String,
        name: String,
        source: kube::Error,
    },
}

/// A single change observed on the pod watch, flattened from
/// `kube::runtime::watcher::Event` into the add/remove shape the merger
/// actually needs (spec.md §4.5 "Pod lifecycle events").
#[derive(Debug, Clone)]
pub enum PodChange {
    Upsert(Pod),
    Delete(Pod),
}

/// Build a `kube::Client` from the agent config's Kubernetes section,
/// falling back to in-cluster discovery when no explicit master URL is
/// given (mirrors how `kube::Client::try_default` behaves for agents
/// actually running inside a pod).
pub async fn build_client(config: &KubernetesConfig) -> Result<Client, K8sError> {
    match &config.master_url {
        Some(master_url) => {
            let kubeconfig = Kubeconfig {
                clusters: vec![NamedCluster {
                    name: "agent".to_owned(),
                    cluster: Some(Cluster {
                        server: Some(master_url.clone()),
                        certificate_authority: config.ca_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                        ..Default::default()
                    }),
                }],
                auth_infos: vec![NamedAuthInfo {
                    name: "agent".to_owned(),
                    auth_info: Some(AuthInfo {
                        token: config.token.clone().map(Into::into),
                        ..Default::default()
                    }),
                }],
                contexts: vec![NamedContext {
                    name: "agent".to_owned(),
                    context: Some(Context {
                        cluster: "agent".to_owned(),
                        user: "agent".to_owned(),
                        namespace: Some(config.namespace.clone()),
                        ..Default::default()
                    }),
                }],
                current_context: Some("agent".to_owned()),
                ..Default::default()
            };
            let kube_config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                .await
                .context(BuildConfigSnafu)?;
            Client::try_from(kube_config).context(BuildClientSnafu)
        }
        None => Client::try_default().await.context(BuildClientSnafu),
    }
}

/// Watch pods in the configured namespace, yielding `PodChange` events as
/// they're observed. Runs forever; reconnects and resyncs are
/// `watcher`'s concern, not ours.
pub fn watch_pods(client: Client, namespace: &str) -> impl Stream<Item = PodChange> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let config = watcher::Config::default();
    kube::runtime::watcher(api, config).filter_map(|event| async move {
        match event {
            Ok(WatchEvent::Apply(pod)) => Some(PodChange::Upsert(pod)),
            Ok(WatchEvent::Delete(pod)) => Some(PodChange::Delete(pod)),
            Ok(WatchEvent::Init) | Ok(WatchEvent::InitApply(_)) | Ok(WatchEvent::InitDone) => None,
            Err(error) => {
                tracing::warn!(%error, "Pod watch stream error; the watcher will resync.");
                None
            }
        }
    })
}

/// Fetch and decode the `ConfigMap` a pod's scrape-config volume points at
/// (spec.md §4.5: "references a configuration document in the pod's
/// project/namespace").
pub async fn fetch_config_map(client: &Client, namespace: &str, name: &str) -> Result<Option<String>, K8sError> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = api
        .get_opt(name)
        .await
        .context(FetchConfigMapSnafu {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        })?;

    Ok(config_map.and_then(|cm| cm.data.and_then(|mut data| data.remove("endpoints.yaml").or_else(|| data.into_values().next()))))
}

pub fn ca_bytes(path: &Path) -> Result<Vec<u8>, K8sError> {
    std::fs::read(path).context(ReadCaSnafu { path: path.to_path_buf() })
}
