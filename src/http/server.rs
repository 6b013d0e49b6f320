//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the route table, exemptions and forwarder from [`ProxyConfig`]
//! - Create the policy poller when forwarding is enabled
//! - Wire the [`UpstreamServer`] into an axum router
//! - Serve until shutdown, then stop the poller

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;

use crate::config::{parse_backend, HandlerKind, ProxyConfig};
use crate::forwarding::{
    exemptions, ExemptionError, HttpPolicyFetcher, PolicyStore, PollError, Poller,
};
use crate::http::forward::{BackendHandler, Forwarder};
use crate::http::upstream::UpstreamServer;
use crate::lifecycle::Shutdown;
use crate::routing::{not_found, Handler, RouteError, RouteTable};

/// Error assembling the server from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid backend url '{url}': {reason}")]
    Backend { url: String, reason: String },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid route method '{0}'")]
    Method(String),

    #[error(transparent)]
    Exemption(#[from] ExemptionError),

    #[error(transparent)]
    Poller(#[from] PollError),
}

/// HTTP server for the proxy.
pub struct HttpServer {
    upstream: UpstreamServer,
    poller: Option<Poller>,
    request_timeout: Duration,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, BuildError> {
        let backend = parse_backend(&config.backend.url).map_err(|reason| BuildError::Backend {
            url: config.backend.url.clone(),
            reason,
        })?;

        let forwarder = Forwarder::new(Duration::from_secs(config.timeouts.forward_secs));
        let routes = build_routes(&config, &forwarder, &backend)?;
        let store = PolicyStore::new();

        let poller = if config.forwarding.enabled {
            let fetcher = HttpPolicyFetcher::new(
                &backend,
                &config.forwarding.policy_path,
                Duration::from_secs(config.forwarding.fetch_timeout_secs),
            )?;
            tracing::info!(
                endpoint = %fetcher.endpoint(),
                interval_secs = config.forwarding.interval_secs,
                "Live forwarding enabled"
            );
            Some(
                Poller::builder(fetcher, store.clone())
                    .interval(Duration::from_secs(config.forwarding.interval_secs))
                    .fetch_timeout(Duration::from_secs(config.forwarding.fetch_timeout_secs))
                    .build(),
            )
        } else {
            tracing::info!("Live forwarding disabled, serving everything locally");
            None
        };

        let upstream = UpstreamServer::builder(routes)
            .exemptions(exemptions::compile(&config.forwarding.exemptions)?)
            .policy_store(store)
            .forwarder(forwarder)
            .build();

        Ok(Self {
            upstream,
            poller,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }

    pub fn upstream(&self) -> &UpstreamServer {
        &self.upstream
    }

    /// Whether a policy poller will run alongside the server.
    pub fn has_poller(&self) -> bool {
        self.poller.is_some()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let poller = self.poller.map(|poller| poller.spawn(shutdown.subscribe()));

        let app = self.upstream.into_router(self.request_timeout);
        let mut stop = shutdown.subscribe();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await;

        // The poller may still be parked if the server exited on its own.
        shutdown.trigger();
        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Policy poller task failed");
            }
        }

        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn build_routes(
    config: &ProxyConfig,
    forwarder: &Forwarder,
    backend: &Url,
) -> Result<RouteTable, BuildError> {
    let backend_handler = BackendHandler::new(forwarder.clone(), backend.clone());
    let mut builder = RouteTable::builder();

    for route in &config.routes {
        let method = match &route.method {
            Some(m) => Some(
                Method::from_bytes(m.as_bytes()).map_err(|_| BuildError::Method(m.clone()))?,
            ),
            None => None,
        };
        let handler: Arc<dyn Handler> = match route.handler {
            HandlerKind::Backend => Arc::new(backend_handler.clone()),
            HandlerKind::Health => Arc::new(health),
            HandlerKind::NotFound => Arc::new(not_found),
        };
        builder = builder.route_shared(method, &route.pattern, handler)?;
    }

    Ok(builder.fallback(backend_handler).build())
}

/// Liveness answer served by the proxy itself.
pub async fn health(_req: Request<Body>) -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::forwarding::ExemptionConfig;
    use axum::http::StatusCode;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.routes.push(RouteConfig {
            pattern: "/-/health".into(),
            method: None,
            handler: HandlerKind::Health,
        });
        config.routes.push(RouteConfig {
            pattern: "/private/.*".into(),
            method: Some("POST".into()),
            handler: HandlerKind::NotFound,
        });
        config
    }

    #[tokio::test]
    async fn test_builds_routes_in_order() {
        let server = HttpServer::new(config()).unwrap();
        assert!(!server.has_poller());

        let req = Request::builder().uri("/-/health").body(Body::empty()).unwrap();
        let response = server.upstream().handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/private/thing")
            .body(Body::empty())
            .unwrap();
        let response = server.upstream().handle(req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_forwarding_enabled_creates_poller() {
        let mut config = config();
        config.forwarding.enabled = true;
        assert!(HttpServer::new(config).unwrap().has_poller());
    }

    #[test]
    fn test_rejects_bad_exemption() {
        let mut config = config();
        config.forwarding.exemptions = vec![ExemptionConfig::Exact("relative".into())];
        assert!(matches!(
            HttpServer::new(config),
            Err(BuildError::Exemption(ExemptionError::NotAbsolute(_)))
        ));
    }

    #[test]
    fn test_rejects_bad_backend() {
        let mut config = config();
        config.backend.url = "https://backend".into();
        assert!(matches!(HttpServer::new(config), Err(BuildError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_health_body() {
        let response = health(Request::new(Body::empty())).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], br#"{"status":"ok"}"#);
    }
}
