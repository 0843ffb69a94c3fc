//! The endpoint source merger (spec.md §4.5): turns pod lifecycle events
//! into `CollectorManager::start_collecting` / `stop_collecting` calls,
//! alongside the static endpoints started once at boot.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tracing::{info, warn};

use crate::config::{pod_additional_environment, EndpointsDocument, RawEndpoint};
use crate::k8s::{self, PodChange};
use crate::manager::CollectorManager;

/// The sentinel volume name the agent looks for in a pod's spec (spec.md
/// §4.5: "a volume whose name matches the agent's sentinel name").
pub struct MergerConfig {
    pub scrape_config_volume_name: String,
    pub default_tenant: String,
}

/// Drive the manager from a pod-change stream until it ends (which in
/// practice is never — `k8s::watch_pods` runs forever).
pub async fn run(
    manager: Arc<CollectorManager>,
    client: Client,
    config: MergerConfig,
    mut pod_changes: impl Stream<Item = PodChange> + Unpin,
) {
    while let Some(change) = pod_changes.next().await {
        match change {
            PodChange::Upsert(pod) => handle_upsert(&manager, &client, &config, pod).await,
            PodChange::Delete(pod) => handle_delete(&manager, &config, &pod),
        }
    }
}

async fn handle_upsert(manager: &Arc<CollectorManager>, client: &Client, config: &MergerConfig, pod: Pod) {
    let Some(pod_name) = pod.metadata.name.clone() else {
        return;
    };
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();

    let Some(config_map_name) = scrape_config_volume_reference(&pod, &config.scrape_config_volume_name) else {
        // No sentinel volume: this pod isn't a scrape target. If it used
        // to be (e.g. the volume was removed on update), any previously
        // started schedulers for it are torn down here too.
        handle_delete(manager, config, &pod);
        return;
    };

    let document = match k8s::fetch_config_map(client, &namespace, &config_map_name).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            warn!(pod = %pod_name, namespace = %namespace, config_map = %config_map_name, "Referenced config map is missing or has no data; skipping this pod.");
            return;
        }
        Err(error) => {
            warn!(pod = %pod_name, namespace = %namespace, %error, "Failed to fetch scrape-config map; leaving existing schedulers untouched.");
            return;
        }
    };

    let parsed = match EndpointsDocument::parse(&document) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(pod = %pod_name, namespace = %namespace, %error, "Scrape-config document failed to parse; skipping this pod.");
            return;
        }
    };

    let additional_environment = build_additional_environment(&pod);
    let host_ip = pod.status.as_ref().and_then(|s| s.host_ip.clone()).unwrap_or_default();

    let mut seen_ids = Vec::with_capacity(parsed.endpoints.len());
    for raw in parsed.endpoints {
        let id = raw.scheduler_id(&namespace, &pod_name, &host_ip);
        seen_ids.push(id.clone());
        match raw.into_endpoint(id, &config.default_tenant, additional_environment.clone()) {
            Ok(endpoint) => {
                info!(id = %endpoint.id, "Starting collection for pod-discovered endpoint.");
                manager.start_collecting(endpoint);
            }
            Err(error) => warn!(pod = %pod_name, %error, "Dropping one malformed endpoint entry from this pod's config."),
        }
    }

    stop_stale_pod_schedulers(manager, &namespace, &pod_name, &seen_ids);
}

fn handle_delete(manager: &Arc<CollectorManager>, config: &MergerConfig, pod: &Pod) {
    let _ = &config.scrape_config_volume_name;
    let Some(pod_name) = pod.metadata.name.clone() else {
        return;
    };
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    stop_stale_pod_schedulers(manager, &namespace, &pod_name, &[]);
}

/// Stop every scheduler previously started for this pod whose id is no
/// longer in `keep` — covers both full pod deletion (`keep` empty) and a
/// config update that dropped an endpoint.
fn stop_stale_pod_schedulers(manager: &Arc<CollectorManager>, namespace: &str, pod_name: &str, keep: &[String]) {
    let prefix = format!("{namespace}|{pod_name}|");
    for id in manager.active_ids() {
        if id.starts_with(&prefix) && !keep.contains(&id) {
            manager.stop_collecting(&id);
        }
    }
}

fn scrape_config_volume_reference(pod: &Pod, volume_name: &str) -> Option<String> {
    let volumes = pod.spec.as_ref()?.volumes.as_ref()?;
    let volume = volumes.iter().find(|v| v.name == volume_name)?;
    volume.config_map.as_ref()?.name.clone()
}

fn build_additional_environment(pod: &Pod) -> crate::model::Tags {
    let metadata = &pod.metadata;
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    let labels: HashMap<String, String> = metadata.labels.clone().unwrap_or_default();

    pod_additional_environment(
        spec.and_then(|s| s.node_name.clone()).unwrap_or_default().as_str(),
        "",
        metadata.namespace.as_deref().unwrap_or_default(),
        "",
        metadata.name.as_deref().unwrap_or_default(),
        metadata.uid.as_deref().unwrap_or_default(),
        status.and_then(|s| s.pod_ip.clone()).unwrap_or_default().as_str(),
        status.and_then(|s| s.host_ip.clone()).unwrap_or_default().as_str(),
        spec.and_then(|s| s.hostname.clone()).unwrap_or_default().as_str(),
        spec.and_then(|s| s.subdomain.clone()).unwrap_or_default().as_str(),
        &labels,
    )
}
