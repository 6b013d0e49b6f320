//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use upstream_proxy::forwarding::{
    stepped, ExemptionRule, HttpPolicyFetcher, PolicyStore, Poller, SleepController,
};
use upstream_proxy::http::{BackendHandler, Forwarder, UpstreamServer};
use upstream_proxy::lifecycle::Shutdown;
use upstream_proxy::routing::RouteTable;

pub const POLICY_PATH: &str = "/api/v4/geo/proxy";

/// Start a programmable mock server on an ephemeral port.
///
/// `f` receives the raw request target (path and query, undecoded) and
/// returns the status and body to answer with.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(target) = read_request_target(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(target).await;
                        let reason = StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");

                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request_target(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next()?;
    request_line.split_whitespace().nth(1).map(str::to_string)
}

/// Mock primary echoing the request target it received.
pub async fn start_primary() -> SocketAddr {
    start_programmable_backend(|target| async move {
        (200, format!("Primary received request to path {}", target))
    })
    .await
}

/// Mock backend serving a scripted policy document and echoing every other request.
pub struct MockBackend {
    pub addr: SocketAddr,
    policy: Arc<Mutex<(u16, String)>>,
    policy_hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let policy = Arc::new(Mutex::new((200, "{}".to_string())));
        let policy_hits = Arc::new(AtomicUsize::new(0));

        let (p, hits) = (policy.clone(), policy_hits.clone());
        let addr = start_programmable_backend(move |target| {
            let (p, hits) = (p.clone(), hits.clone());
            async move {
                if target == POLICY_PATH {
                    hits.fetch_add(1, Ordering::SeqCst);
                    p.lock().unwrap().clone()
                } else {
                    (200, format!("Local received request to path {}", target))
                }
            }
        })
        .await;

        Self {
            addr,
            policy,
            policy_hits,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    /// Answer future policy requests with `status` and `body`.
    pub fn set_policy(&self, status: u16, body: impl Into<String>) {
        *self.policy.lock().unwrap() = (status, body.into());
    }

    pub fn policy_hits(&self) -> usize {
        self.policy_hits.load(Ordering::SeqCst)
    }
}

/// An upstream server wired to `backend` with a stepped poller already spawned.
pub struct Harness {
    pub server: UpstreamServer,
    pub store: PolicyStore,
    pub controller: SleepController,
    pub shutdown: Shutdown,
}

impl Harness {
    /// Spawn the poller and wait for its first tick to finish.
    pub async fn start(backend: &MockBackend, exemptions: Vec<ExemptionRule>) -> Self {
        let store = PolicyStore::new();
        let forwarder = Forwarder::new(std::time::Duration::from_secs(5));
        let routes = RouteTable::builder()
            .fallback(BackendHandler::new(forwarder.clone(), backend.url()))
            .build();

        let server = UpstreamServer::builder(routes)
            .exemptions(exemptions)
            .policy_store(store.clone())
            .forwarder(forwarder)
            .build();

        let fetcher = HttpPolicyFetcher::new(
            &backend.url(),
            POLICY_PATH,
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let (sleeper, mut controller) = stepped();
        let shutdown = Shutdown::new();
        Poller::builder(fetcher, store.clone())
            .sleeper(sleeper)
            .build()
            .spawn(shutdown.subscribe());
        controller.wait_parked().await;

        Self {
            server,
            store,
            controller,
            shutdown,
        }
    }
}

/// Send a GET for `path` (kept verbatim) and return status and body.
pub async fn get(server: &UpstreamServer, path: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = server.handle(req).await;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}
