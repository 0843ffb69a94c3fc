//! A thin wrapper over `hyper::Client<HttpsConnector<HttpConnector>>`,
//! shared by both protocol adapters. TLS material loading (reading the
//! agent's cert/key off disk) is out of scope for this crate — see
//! spec.md §1 — so [`TlsIdentity`] just carries already-loaded PEM bytes.

use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, Request, StatusCode, Uri};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_openssl::HttpsConnector;
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod};
use openssl::x509::X509;
use snafu::{ResultExt, Snafu};

use crate::model::Credentials;

#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("failed to build request: {}", source))]
    BuildRequest { source: http::Error },
    #[snafu(display("HTTP request failed: {}", source))]
    Request { source: hyper::Error },
    #[snafu(display("failed to read response body: {}", source))]
    ReadBody { source: hyper::Error },
    #[snafu(display("server responded with non-success status {}", status))]
    Status { status: StatusCode },
    #[snafu(display("failed to configure TLS client identity: {}", source))]
    Tls { source: openssl::error::ErrorStack },
}

/// The agent's own client certificate and key, attached to scrapes against
/// `https://` endpoints.
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>>,
}

impl HttpClient {
    pub fn new(identity: Option<&TlsIdentity>) -> Result<Self, TransportError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let mut ssl = SslConnector::builder(SslMethod::tls()).context(TlsSnafu)?;
        if let Some(identity) = identity {
            let cert = X509::from_pem(&identity.cert_pem).context(TlsSnafu)?;
            let key = PKey::private_key_from_pem(&identity.key_pem).context(TlsSnafu)?;
            ssl.set_certificate(&cert).context(TlsSnafu)?;
            ssl.set_private_key(&key).context(TlsSnafu)?;
        }

        let https = HttpsConnector::with_connector(http, ssl).context(TlsSnafu)?;
        Ok(HttpClient {
            inner: Client::builder().build(https),
        })
    }

    /// Issue a GET and return the response. Any status outside 200..300 is a
    /// failure — adapters retry nothing at this layer (spec.md §4.1).
    pub async fn get(
        &self,
        uri: Uri,
        accept: &str,
        credentials: Option<&Credentials>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = Request::builder().method(Method::GET).uri(uri).header("accept", accept);
        builder = attach_auth(builder, credentials);
        let request = builder.body(Body::empty()).context(BuildRequestSnafu)?;
        self.execute(request).await
    }

    /// Issue a JSON POST (used by the Jolokia bulk-read).
    pub async fn post_json(
        &self,
        uri: Uri,
        body: Bytes,
        credentials: Option<&Credentials>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        builder = attach_auth(builder, credentials);
        let request = builder.body(Body::from(body)).context(BuildRequestSnafu)?;
        self.execute(request).await
    }

    async fn execute(&self, request: Request<Body>) -> Result<HttpResponse, TransportError> {
        let response = self.inner.request(request).await.context(RequestSnafu)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = hyper::body::to_bytes(response.into_body()).await.context(ReadBodySnafu)?;
        if !status.is_success() {
            return StatusSnafu { status }.fail();
        }
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// A scrape response's status, `Content-Type` (if present), and body —
/// enough for the Prometheus adapter to dispatch between the text and
/// binary-delimited decoders (spec.md §4.1.1).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

fn attach_auth(
    builder: http::request::Builder,
    credentials: Option<&Credentials>,
) -> http::request::Builder {
    match credentials {
        // Bearer takes precedence over basic auth (spec.md §4.1).
        Some(Credentials::Bearer { token }) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
        Some(Credentials::Basic { username, password }) => {
            let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
            builder.header(AUTHORIZATION, format!("Basic {encoded}"))
        }
        None => builder,
    }
}

/// Shared, cloneable handle so every scheduler task can hold its own
/// reference without re-building the TLS connector per endpoint.
pub type SharedHttpClient = Arc<HttpClient>;
