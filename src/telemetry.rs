//! The optional self-telemetry HTTP endpoint (spec.md §7): `/health`
//! always 200s, `/status` dumps the status registry (optionally gated
//! behind basic auth), `/metrics` renders whatever the `metrics` crate's
//! installed recorder has accumulated. Bound only when the agent config
//! enables it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use base64::prelude::*;
use http::{Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{error, info};

use crate::status::StatusRegistry;

#[derive(Clone)]
pub struct TelemetryConfig {
    pub bind_address: SocketAddr,
    pub basic_auth: Option<(String, String)>,
}

struct TelemetryState {
    status: Arc<StatusRegistry>,
    metrics_handle: PrometheusHandle,
    basic_auth: Option<(String, String)>,
}

/// Install the process-wide recorder and spawn the HTTP server. Returns
/// immediately; the server runs until the process exits.
pub fn spawn(config: TelemetryConfig, status: Arc<StatusRegistry>) {
    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(error) => {
            error!(%error, "Failed to install the self-telemetry metrics recorder; /metrics will be unavailable.");
            return;
        }
    };

    let state = Arc::new(TelemetryState {
        status,
        metrics_handle,
        basic_auth: config.basic_auth,
    });

    let make_service = make_service_fn(move |_| {
        let state = state.clone();
        let service = service_fn(move |request| handle(state.clone(), request));
        async move { Ok::<_, Infallible>(service) }
    });

    let server = Server::bind(&config.bind_address).serve(make_service);
    info!(address = %config.bind_address, "Self-telemetry server listening.");

    tokio::spawn(async move {
        if let Err(error) = server.await {
            error!(%error, "Self-telemetry server exited with an error.");
        }
    });
}

async fn handle(state: Arc<TelemetryState>, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match request.uri().path() {
        "/health" => Response::new(Body::from("ok")),
        "/status" => {
            if !authorized(&state, &request) {
                return Ok(unauthorized());
            }
            render_status(&state)
        }
        "/metrics" => {
            if !authorized(&state, &request) {
                return Ok(unauthorized());
            }
            Response::new(Body::from(state.metrics_handle.render()))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("static response is always valid"),
    };
    Ok(response)
}

fn render_status(state: &TelemetryState) -> Response<Body> {
    #[derive(serde::Serialize)]
    struct StatusView {
        states: std::collections::HashMap<String, String>,
        log: Vec<crate::status::LogLine>,
    }

    let view = StatusView {
        states: state.status.snapshot_states(),
        log: state.status.snapshot_log(),
    };

    match serde_json::to_vec(&view) {
        Ok(body) => Response::builder()
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("serialized JSON is always a valid response body"),
        Err(error) => {
            error!(%error, "Failed to serialize status snapshot.");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .expect("static response is always valid")
        }
    }
}

fn authorized(state: &TelemetryState, request: &Request<Body>) -> bool {
    let Some((expected_user, expected_pass)) = &state.basic_auth else {
        return true;
    };

    let Some(header) = request.headers().get(http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(header) = header.to_str() else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64_STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return false;
    };

    user == expected_user && pass == expected_pass
}

fn unauthorized() -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("www-authenticate", "Basic realm=\"collector-agent\"")
        .body(Body::empty())
        .expect("static response is always valid")
}
