//! Per-request entry point composing routing and forwarding.
//!
//! # Data Flow
//! ```text
//! request
//!     → normalize(path)
//!     → decider.decide(canonical, policy snapshot)
//!         Forward(target) → Forwarder (502/504 on failure)
//!         Local           → RouteTable::dispatch(canonical, original request)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::forwarding::{Decision, ExemptionRule, ForwardingDecider, PolicyStore};
use crate::http::forward::Forwarder;
use crate::observability::metrics;
use crate::routing::{normalize, RouteTable};

struct Inner {
    routes: RouteTable,
    decider: ForwardingDecider,
    policy: PolicyStore,
    forwarder: Forwarder,
}

/// The request handler shared by every connection.
#[derive(Clone)]
pub struct UpstreamServer {
    inner: Arc<Inner>,
}

impl UpstreamServer {
    pub fn builder(routes: RouteTable) -> UpstreamServerBuilder {
        UpstreamServerBuilder {
            routes,
            exemptions: Vec::new(),
            policy: None,
            forwarder: None,
        }
    }

    /// The store this server reads its forwarding policy from.
    pub fn policy_store(&self) -> &PolicyStore {
        &self.inner.policy
    }

    /// Decide and serve one request.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let canonical = normalize(request.uri().path());

        // One snapshot for the whole request.
        let policy = self.inner.policy.snapshot();
        let decision = self.inner.decider.decide(&canonical, &policy);

        let (label, response) = match decision {
            Decision::Forward(target) => {
                tracing::debug!(
                    method = %method,
                    path = %canonical,
                    target = %target,
                    "Forwarding request to primary"
                );
                let response = match self.inner.forwarder.forward(&target, request).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(
                            method = %method,
                            path = %canonical,
                            target = %target,
                            error = %e,
                            "Forward to primary failed"
                        );
                        e.into_response()
                    }
                };
                ("forward", response)
            }
            Decision::Local => {
                tracing::debug!(method = %method, path = %canonical, "Serving request locally");
                ("local", self.inner.routes.dispatch(&canonical, request).await)
            }
        };

        metrics::record_request(label, response.status().as_u16(), start);
        response
    }

    /// Wrap [`handle`](Self::handle) in an axum router with request IDs,
    /// tracing and the inbound request deadline.
    #[allow(deprecated)]
    pub fn into_router(self, request_timeout: Duration) -> Router {
        Router::new()
            .fallback(upstream_handler)
            .with_state(self)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }
}

async fn upstream_handler(State(server): State<UpstreamServer>, request: Request<Body>) -> Response {
    server.handle(request).await
}

/// Builder for [`UpstreamServer`]; every collaborator is injectable.
pub struct UpstreamServerBuilder {
    routes: RouteTable,
    exemptions: Vec<ExemptionRule>,
    policy: Option<PolicyStore>,
    forwarder: Option<Forwarder>,
}

impl UpstreamServerBuilder {
    pub fn exemptions(mut self, exemptions: Vec<ExemptionRule>) -> Self {
        self.exemptions = exemptions;
        self
    }

    /// Share a store with a poller. Defaults to a fresh, disabled store.
    pub fn policy_store(mut self, store: PolicyStore) -> Self {
        self.policy = Some(store);
        self
    }

    pub fn forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn build(self) -> UpstreamServer {
        UpstreamServer {
            inner: Arc::new(Inner {
                routes: self.routes,
                decider: ForwardingDecider::new(self.exemptions),
                policy: self.policy.unwrap_or_default(),
                forwarder: self
                    .forwarder
                    .unwrap_or_else(|| Forwarder::new(Duration::from_secs(30))),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::ForwardingPolicy;
    use axum::http::StatusCode;
    use tower::ServiceExt;
    use url::Url;

    fn server() -> UpstreamServer {
        let routes = RouteTable::builder()
            .route("/-/health", |_req: Request<Body>| async { "healthy".into_response() })
            .unwrap()
            .fallback(|req: Request<Body>| async move {
                format!("local {}", req.uri().path()).into_response()
            })
            .build();

        UpstreamServer::builder(routes)
            .exemptions(vec![ExemptionRule::exact("/-/health").unwrap()])
            .build()
    }

    async fn get(server: &UpstreamServer, path: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = server.handle(req).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_disabled_serves_locally() {
        let server = server();
        assert_eq!(get(&server, "/anything").await.1, "local /anything");
        assert_eq!(get(&server, "/-/health").await.1, "healthy");
    }

    #[tokio::test]
    async fn test_exempt_path_local_when_enabled() {
        let server = server();
        server
            .policy_store()
            .publish(ForwardingPolicy::fetched(Some(Url::parse("http://primary.invalid").unwrap())));

        assert_eq!(get(&server, "/-/health").await, (StatusCode::OK, "healthy".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_primary_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = server();
        server
            .policy_store()
            .publish(ForwardingPolicy::fetched(Some(Url::parse(&format!("http://{}", addr)).unwrap())));

        assert_eq!(get(&server, "/anything").await.0, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_router_sets_request_id() {
        let app = server().into_router(Duration::from_secs(5));
        let response = app
            .oneshot(Request::builder().uri("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
