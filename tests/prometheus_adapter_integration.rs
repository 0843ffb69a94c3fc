//! End-to-end exercise of the Prometheus adapter against a real HTTP
//! server, grounded in the teacher's `spawn_blackhole_http_server` pattern
//! (`src/test_util/http.rs`) — here inlined rather than depending on the
//! teacher's full test-utility module, since only one handler is needed.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};

use collector_agent::adapters::{Adapter, PrometheusAdapter};
use collector_agent::http_client::HttpClient;
use collector_agent::model::{EndpointAddress, EndpointType, MetricType, MonitoredMetric, Tags};

async fn respond_metrics(_request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let body = "# HELP up Whether the target is reachable.\n\
                # TYPE up gauge\n\
                up 1\n\
                # TYPE http_requests_total counter\n\
                http_requests_total{method=\"get\",code=\"200\"} 3\n\
                http_requests_total{method=\"get\",code=\"500\"} 1\n";
    Ok(Response::new(Body::from(body)))
}

async fn spawn_server() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let make_service =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(respond_metrics)) });
    let server = Server::from_tcp(listener).unwrap().serve(make_service);

    tokio::spawn(async move {
        let _ = server.await;
    });

    addr
}

fn endpoint(address: SocketAddr, metrics: Vec<MonitoredMetric>) -> collector_agent::model::Endpoint {
    collector_agent::model::Endpoint {
        id: "static|prometheus|test".to_owned(),
        endpoint_type: EndpointType::Prometheus,
        address: EndpointAddress::Url(format!("http://{address}/metrics")),
        collection_interval: None,
        credentials: None,
        tenant: "t1".to_owned(),
        enabled: true,
        tags: Tags::new(),
        metrics,
        additional_environment: Tags::new(),
    }
}

#[tokio::test]
async fn scrape_real_server_produces_collected_metrics() {
    let address = spawn_server().await;
    // Give the listener a moment to start accepting; `from_tcp` already
    // binds synchronously, so this is just a courtesy against scheduling
    // jitter on a loaded CI host.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let client = Arc::new(HttpClient::new(None).unwrap());
    let adapter = PrometheusAdapter::new(
        endpoint(
            address,
            vec![
                MonitoredMetric::synthetic("up", MetricType::Gauge),
                MonitoredMetric::synthetic("http_requests_total", MetricType::Counter),
            ],
        ),
        client,
    );

    let collected = adapter.scrape().await.expect("scrape should succeed against a live server");
    assert_eq!(collected.len(), 2);

    let up = collected.iter().find(|m| m.name == "up").unwrap();
    assert_eq!(up.metric_type, MetricType::Gauge);
    assert_eq!(up.datapoints.len(), 1);
    assert_eq!(up.datapoints[0].value, 1.0);

    let requests = collected.iter().find(|m| m.name == "http_requests_total").unwrap();
    assert_eq!(requests.metric_type, MetricType::Counter);
    assert_eq!(requests.datapoints.len(), 2);

    let labels: Vec<BTreeMap<String, String>> = requests.datapoints.iter().map(|dp| dp.labels.clone()).collect();
    assert!(labels.iter().any(|l| l.get("code").map(String::as_str) == Some("200")));
    assert!(labels.iter().any(|l| l.get("code").map(String::as_str) == Some("500")));
}

#[tokio::test]
async fn fetch_metric_details_picks_up_help_and_inferred_units() {
    let address = spawn_server().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let client = Arc::new(HttpClient::new(None).unwrap());
    let adapter = PrometheusAdapter::new(endpoint(address, vec![]), client);

    let details = adapter
        .fetch_metric_details(&["up".to_owned()])
        .await
        .expect("fetch_metric_details should succeed");

    let up = details.get("up").expect("up should be present");
    assert_eq!(up.description.as_deref(), Some("Whether the target is reachable."));
    assert_eq!(up.metric_type, Some(MetricType::Gauge));
}

#[tokio::test]
async fn scrape_against_closed_port_fails_without_retry() {
    // Nothing listens here: the adapter performs exactly one request per
    // call and surfaces a transport error rather than retrying.
    let client = Arc::new(HttpClient::new(None).unwrap());
    let adapter = PrometheusAdapter::new(endpoint("127.0.0.1:1".parse().unwrap(), vec![]), client);

    let error = adapter.scrape().await.unwrap_err();
    assert!(matches!(
        error,
        collector_agent::adapters::ScrapeError::Transport { .. }
    ));
}
