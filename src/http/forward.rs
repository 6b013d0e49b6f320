//! Transparent reverse-proxy relay.
//!
//! # Responsibilities
//! - Rewrite the request URI onto a target base URL, keeping path and query verbatim
//! - Strip hop-by-hop headers and point `Host` at the target
//! - Stream the request body out and the upstream response back unmodified
//!
//! # Design Decisions
//! - No retries: failures surface to the caller as 502, deadlines as 504
//! - Plain HTTP client; TLS towards targets is out of scope
//! - The inbound request deadline still applies, since dropping the handler
//!   future cancels the relay

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;
use url::Url;

use crate::routing::Handler;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers that describe a single connection and are never relayed.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Error relaying a request upstream.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid forward target: {0}")]
    InvalidTarget(String),

    #[error("unsupported forward scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        match self {
            ForwardError::Timeout(_) => {
                (StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out").into_response()
            }
            _ => (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response(),
        }
    }
}

/// HTTP relay shared by every request.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Forwarder {
    /// `timeout` bounds the wait for upstream response headers.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    /// Relay `request` to `target`.
    pub async fn forward(&self, target: &Url, request: Request<Body>) -> Result<Response, ForwardError> {
        if target.scheme() != "http" {
            return Err(ForwardError::UnsupportedScheme(target.scheme().to_string()));
        }

        let (mut parts, body) = request.into_parts();
        let uri = upstream_uri(target, &parts.uri)?;

        let original_host = parts.headers.get(header::HOST).cloned();
        strip_hop_by_hop(&mut parts.headers);
        if let Some(authority) = uri.authority() {
            let host = HeaderValue::from_str(authority.as_str())
                .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
            parts.headers.insert(header::HOST, host);
        }
        if let Some(host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
        parts.uri = uri;

        let upstream = Request::from_parts(parts, body);
        let response = match time::timeout(self.timeout, self.client.request(upstream)).await {
            Ok(result) => result?,
            Err(_) => return Err(ForwardError::Timeout(self.timeout)),
        };

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// `target` base (without trailing slash) + original path + original query.
pub fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, ForwardError> {
    let mut uri = target.as_str().trim_end_matches('/').to_string();
    uri.push_str(original.path());
    if let Some(query) = original.query() {
        uri.push('?');
        uri.push_str(query);
    }

    uri.parse::<Uri>()
        .map_err(|e| ForwardError::InvalidTarget(format!("{}: {}", uri, e)))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are connection-scoped as well.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Local handler relaying everything to a fixed backend.
#[derive(Clone)]
pub struct BackendHandler {
    forwarder: Forwarder,
    backend: Url,
}

impl BackendHandler {
    pub fn new(forwarder: Forwarder, backend: Url) -> Self {
        Self { forwarder, backend }
    }
}

impl Handler for BackendHandler {
    fn call(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        let handler = self.clone();
        Box::pin(async move {
            match handler.forwarder.forward(&handler.backend, req).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(backend = %handler.backend, error = %e, "Backend request failed");
                    e.into_response()
                }
            }
        })
    }
}
