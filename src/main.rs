//! Process entry point: CLI flags, config load, logging bootstrap, and
//! wiring the leaf components (spec.md §1 lists CLI/config/bootstrap as an
//! out-of-scope collaborator — this is the thin, idiomatic realization of
//! it needed to produce a runnable binary, built the way the teacher wires
//! its own `main.rs`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use snafu::ResultExt;
use tracing_limit::RateLimitedLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use collector_agent::config::{self, AgentConfig, RawCredentials};
use collector_agent::http_client::{self, HttpClient, TlsIdentity};
use collector_agent::manager::{self, CollectorManager, ManagerConfig};
use collector_agent::sink::ChannelSink;
use collector_agent::status::StatusRegistry;
use collector_agent::{k8s, merger, telemetry};

#[derive(Debug, Parser)]
#[command(name = "collector-agent", about = "Scrapes Prometheus/Jolokia endpoints and forwards normalized time series.")]
struct Cli {
    /// Path to the agent's YAML configuration file.
    #[arg(long, short = 'c', default_value = "collector-agent.yaml")]
    config: PathBuf,

    /// Path to the agent's own TLS client certificate (PEM), used for
    /// `https://` scrape targets.
    #[arg(long)]
    cert_path: Option<PathBuf>,

    /// Path to the agent's own TLS client private key (PEM).
    #[arg(long)]
    key_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match AgentConfig::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, path = %cli.config.display(), "Failed to load agent configuration.");
            std::process::exit(1);
        }
    };

    if let Err(error) = run(config, cli.cert_path, cli.key_path).await {
        tracing::error!(%error, "Agent exited with an error.");
        std::process::exit(1);
    }
}

/// Structured logging, matching the teacher's `tracing` + `tracing-subscriber`
/// stack, with the teacher's own `tracing-limit` layer installed so a
/// permanently-broken endpoint logs its failure only a handful of times a
/// minute rather than once per tick (spec.md §7, SPEC_FULL.md §2).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let limited = RateLimitedLayer::new(fmt_layer).with_default_limit(10);

    tracing_subscriber::registry().with(env_filter).with(limited).init();
}

#[derive(Debug, snafu::Snafu)]
enum RunError {
    #[snafu(display("invalid collector configuration: {}", source))]
    Config { source: config::ConfigError },
    #[snafu(display("failed to build HTTP client: {}", source))]
    HttpClient { source: http_client::TransportError },
    #[snafu(display("failed to read TLS identity: {}", source))]
    ReadTls { source: std::io::Error },
    #[snafu(display("invalid telemetry bind address `{}`: {}", value, source))]
    TelemetryAddress { value: String, source: std::net::AddrParseError },
    #[snafu(display("failed to build Kubernetes client: {}", source))]
    K8s { source: k8s::K8sError },
}

async fn run(config: AgentConfig, cert_path: Option<PathBuf>, key_path: Option<PathBuf>) -> Result<(), RunError> {
    let identity = load_tls_identity(cert_path, key_path).context(ReadTlsSnafu)?;
    let http_client = Arc::new(HttpClient::new(identity.as_ref()).context(HttpClientSnafu)?);

    let status = Arc::new(StatusRegistry::new());
    let (channel_sink, mut definitions_rx, mut datapoints_rx) = ChannelSink::new(1024);

    // The downstream time-series store client is an out-of-scope
    // collaborator (spec.md §1): this drains both channels so the manager
    // never blocks against a full queue in this standalone binary, logging
    // batch sizes in its place.
    tokio::spawn(async move {
        while let Some(batch) = definitions_rx.recv().await {
            tracing::debug!(count = batch.len(), "Received metric definition batch.");
        }
    });
    tokio::spawn(async move {
        while let Some(batch) = datapoints_rx.recv().await {
            tracing::debug!(count = batch.len(), "Received datapoint batch.");
        }
    });

    let manager_config = ManagerConfig {
        min_interval: config.min_interval().context(ConfigSnafu)?,
        default_interval: config.default_interval().context(ConfigSnafu)?,
        metric_id_prefix: config.collector.metric_id_prefix.clone(),
        global_tags: config.collector.global_tags.clone(),
        scrape_timeout: None,
    };

    let manager = Arc::new(CollectorManager::new(
        manager_config,
        Arc::new(channel_sink),
        status.clone(),
        http_client,
    ));

    let static_endpoints = config::resolve_static_endpoints(&config).context(ConfigSnafu)?;
    tracing::info!(count = static_endpoints.len(), "Starting statically configured endpoints.");
    manager.start_collecting_endpoints(static_endpoints);

    if config.telemetry.enabled {
        spawn_telemetry(&config, status.clone())?;
    }

    if let Some(kubernetes) = config.kubernetes.clone() {
        let client = k8s::build_client(&kubernetes).await.context(K8sSnafu)?;
        let pod_changes = k8s::watch_pods(client.clone(), &kubernetes.namespace);
        let merger_config = merger::MergerConfig {
            scrape_config_volume_name: kubernetes.scrape_config_volume_name.clone(),
            default_tenant: config.server.tenant.clone(),
        };
        let manager_for_merger = manager.clone();
        tokio::spawn(async move {
            merger::run(manager_for_merger, client, merger_config, Box::pin(pod_changes)).await;
        });
    }

    shutdown_signal().await;
    tracing::info!("Shutdown signal received; stopping all schedulers.");
    manager.stop_collecting_all();

    Ok(())
}

fn load_tls_identity(cert_path: Option<PathBuf>, key_path: Option<PathBuf>) -> Result<Option<TlsIdentity>, std::io::Error> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsIdentity {
            cert_pem: std::fs::read(cert_path)?,
            key_pem: std::fs::read(key_path)?,
        })),
        _ => Ok(None),
    }
}

fn spawn_telemetry(config: &AgentConfig, status: Arc<StatusRegistry>) -> Result<(), RunError> {
    let bind_address_raw = config
        .telemetry
        .bind_address
        .clone()
        .unwrap_or_else(|| "0.0.0.0:9091".to_owned());
    let bind_address: SocketAddr = bind_address_raw
        .parse()
        .context(TelemetryAddressSnafu { value: bind_address_raw.clone() })?;

    let basic_auth = config.telemetry.status_basic_auth.clone().map(|raw| match raw {
        RawCredentials::Basic { username, password } => (username, password),
        RawCredentials::Token { token } => (String::new(), token),
    });

    telemetry::spawn(telemetry::TelemetryConfig { bind_address, basic_auth }, status);
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
