//! The collector manager (spec.md §4.4): owns the keyed table of active
//! per-endpoint schedulers and guarantees at most one scheduler per id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::adapters::Adapter;
use crate::expander::{self, ExpandedMetric};
use crate::http_client::SharedHttpClient;
use crate::model::{Endpoint, MetricDefinitionDeclaration, MetricType, Tags};
use crate::sink::SinkHandle;
use crate::status::StatusRegistry;
use crate::tags::compose_tags;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub min_interval: Duration,
    pub default_interval: Duration,
    pub metric_id_prefix: String,
    pub global_tags: Tags,
    /// Per-scrape deadline on top of the interval clamp (spec.md §5).
    /// `None` means the interval itself is the deadline.
    pub scrape_timeout: Option<Duration>,
}

struct SchedulerHandle {
    task: tokio::task::JoinHandle<()>,
}

/// Owns every active scheduler. The table mutex is acquired only around
/// insert/remove/lookup — never across a scrape or a channel send
/// (spec.md §5).
pub struct CollectorManager {
    table: Mutex<HashMap<String, SchedulerHandle>>,
    config: ManagerConfig,
    sink: Arc<dyn SinkHandle>,
    status: Arc<StatusRegistry>,
    http_client: SharedHttpClient,
}

impl CollectorManager {
    pub fn new(
        config: ManagerConfig,
        sink: Arc<dyn SinkHandle>,
        status: Arc<StatusRegistry>,
        http_client: SharedHttpClient,
    ) -> Self {
        CollectorManager {
            table: Mutex::new(HashMap::new()),
            config,
            sink,
            status,
            http_client,
        }
    }

    /// Called once at startup with the static config-file endpoints.
    pub fn start_collecting_endpoints(&self, endpoints: Vec<Endpoint>) {
        for endpoint in endpoints {
            self.start_collecting(endpoint);
        }
    }

    /// Idempotent-with-replacement: if `endpoint.id` is already running, the
    /// old scheduler is stopped before the new one is spawned, so it never
    /// observes the new scheduler's first tick (spec.md §8 "Replacement
    /// atomicity").
    pub fn start_collecting(&self, endpoint: Endpoint) {
        self.stop_collecting(&endpoint.id);
        if !endpoint.enabled {
            return;
        }

        let id = endpoint.id.clone();
        let adapter = Adapter::new(endpoint, self.http_client.clone());
        let config = self.config.clone();
        let sink = self.sink.clone();
        let status = self.status.clone();

        let task = tokio::spawn(async move {
            run_scheduler(adapter, config, sink, status).await;
        });

        let mut table = self.table.lock().expect("manager table mutex poisoned");
        table.insert(id, SchedulerHandle { task });
    }

    /// Best-effort immediate: aborts the scheduler task right away, which
    /// may interrupt a scrape mid-flight. This crate resolves spec.md §9's
    /// open question in favor of a small chance of lost-but-scraped data
    /// during shutdown/replacement over a small chance of duplicate
    /// emission — see DESIGN.md.
    pub fn stop_collecting(&self, id: &str) {
        let handle = {
            let mut table = self.table.lock().expect("manager table mutex poisoned");
            table.remove(id)
        };
        if let Some(handle) = handle {
            handle.task.abort();
        }
        self.status.clear(id);
    }

    pub fn stop_collecting_all(&self) {
        let handles: Vec<(String, SchedulerHandle)> = {
            let mut table = self.table.lock().expect("manager table mutex poisoned");
            table.drain().collect()
        };
        for (id, handle) in handles {
            handle.task.abort();
            self.status.clear(&id);
        }
        self.status.clear_all();
    }

    pub fn active_ids(&self) -> Vec<String> {
        let table = self.table.lock().expect("manager table mutex poisoned");
        table.keys().cloned().collect()
    }
}

/// One scheduler's lifetime: clamp the interval, then tick until cancelled.
/// Scrape cycles are strictly serial (spec.md §5 "Ordering guarantees") —
/// `tokio::time::interval`'s default `Burst` behavior would stack missed
/// ticks, so we set `Skip` to collapse them into a single later tick.
async fn run_scheduler(adapter: Adapter, config: ManagerConfig, sink: Arc<dyn SinkHandle>, status: Arc<StatusRegistry>) {
    let endpoint_id = adapter.id().to_owned();
    let interval_duration = adapter
        .endpoint()
        .collection_interval
        .unwrap_or(config.default_interval)
        .max(config.min_interval);

    let mut ticker = tokio::time::interval(interval_duration);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let scrape_timeout = config.scrape_timeout.unwrap_or(interval_duration);
    let mut declared: HashSet<String> = HashSet::new();

    loop {
        ticker.tick().await;
        run_cycle(&adapter, &config, &sink, &status, &endpoint_id, scrape_timeout, &mut declared).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_cycle(
    adapter: &Adapter,
    config: &ManagerConfig,
    sink: &Arc<dyn SinkHandle>,
    status: &Arc<StatusRegistry>,
    endpoint_id: &str,
    scrape_timeout: Duration,
    declared: &mut HashSet<String>,
) {
    let started = Instant::now();

    let scrape_result = tokio::time::timeout(scrape_timeout, adapter.scrape()).await;
    let collected = match scrape_result {
        Ok(Ok(collected)) => collected,
        Ok(Err(error)) => {
            status.record(endpoint_id, format!("ERROR: {error}"));
            metrics::counter!("collector_scrape_errors_total", "endpoint_id" => endpoint_id.to_owned()).increment(1);
            return;
        }
        Err(_elapsed) => {
            status.record(endpoint_id, "ERROR: scrape exceeded its deadline".to_owned());
            metrics::counter!("collector_scrape_errors_total", "endpoint_id" => endpoint_id.to_owned()).increment(1);
            return;
        }
    };

    let output = expander::expand_cycle(adapter.endpoint(), &config.global_tags, &config.metric_id_prefix, &collected);
    let datapoint_count: usize = output.series.iter().map(|s| s.datapoints.len()).sum();

    if !output.series.is_empty() {
        if let Err(error) = sink.send_datapoints(output.series).await {
            warn!(endpoint_id, %error, "Failed to push datapoint batch to sink.");
        }
    }

    let needed: Vec<ExpandedMetric> = output
        .metrics
        .into_iter()
        .filter(|metric| !declared.contains(&metric.final_id))
        .collect();

    if !needed.is_empty() {
        let definitions = build_definitions(adapter, config, &needed).await;
        match sink.send_definitions(definitions).await {
            Ok(()) => {
                for metric in &needed {
                    declared.insert(metric.final_id.clone());
                }
            }
            Err(error) => warn!(endpoint_id, %error, "Failed to push metric definition batch to sink."),
        }
    }

    metrics::counter!("collector_datapoints_emitted_total", "endpoint_id" => endpoint_id.to_owned())
        .increment(datapoint_count as u64);
    status.record(
        endpoint_id,
        format!("OK; {} metrics in {:?}", datapoint_count, started.elapsed()),
    );
}

/// Build declarations for the ids a cycle saw for the first time. Adapter
/// metadata fills in type/units/description only where config left them
/// blank; a failed `fetch_metric_details` call does not block declaration,
/// it just means every field falls through to config (spec.md §4.2
/// "Definition declaration").
async fn build_definitions(
    adapter: &Adapter,
    config: &ManagerConfig,
    needed: &[ExpandedMetric],
) -> Vec<MetricDefinitionDeclaration> {
    let names: Vec<String> = needed.iter().map(|m| m.metric.name.clone()).collect();
    let details = match adapter.fetch_metric_details(&names).await {
        Ok(details) => details,
        Err(error) => {
            warn!(endpoint_id = adapter.id(), %error, "Failed to fetch metric details; definitions will use config only.");
            HashMap::new()
        }
    };

    let endpoint = adapter.endpoint();
    needed
        .iter()
        .map(|item| {
            let detail = details.get(&item.metric.name);
            let metric_type = item.metric.metric_type.or_else(|| detail.and_then(|d| d.metric_type)).unwrap_or_else(|| {
                warn!(
                    metric = %item.metric.name,
                    endpoint_id = %endpoint.id,
                    "No declared or adapter-supplied type for metric; defaulting to gauge."
                );
                MetricType::Gauge
            });

            let mut effective_metric = item.metric.clone();
            if effective_metric.description.is_none() {
                effective_metric.description = detail.and_then(|d| d.description.clone());
            }
            if effective_metric.units.is_none() {
                effective_metric.units = detail.and_then(|d| d.units.clone());
            }

            let tags = compose_tags(
                &endpoint.tags,
                &effective_metric,
                &config.global_tags,
                &endpoint.additional_environment,
                &item.final_id,
            );

            MetricDefinitionDeclaration {
                tenant: endpoint.tenant.clone(),
                metric_type,
                id: item.final_id.clone(),
                tags,
            }
        })
        .collect()
}
