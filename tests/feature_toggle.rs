//! Full server built from configuration, with forwarding toggled on and off.

mod common;

use std::time::Duration;

use tokio::net::TcpListener;

use common::{start_primary, MockBackend};
use upstream_proxy::config::ProxyConfig;
use upstream_proxy::http::HttpServer;
use upstream_proxy::lifecycle::Shutdown;

fn config(backend: &MockBackend, forwarding: bool) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.backend.url = backend.url().to_string();
    config.forwarding.enabled = forwarding;
    config.forwarding.interval_secs = 1;
    config.observability.metrics_enabled = false;
    config
}

#[tokio::test]
async fn test_toggle_off_never_polls() {
    let primary = start_primary().await;
    let backend = MockBackend::start().await;
    backend.set_policy(200, format!(r#"{{"primary_url":"http://{}"}}"#, primary));

    let server = HttpServer::new(config(&backend, false)).unwrap();
    assert!(!server.has_poller());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    let client = reqwest::Client::new();
    for _ in 0..3 {
        let res = client
            .get(format!("http://{}/api/v4/jobs/request", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().contains_key("x-request-id"));
        assert_eq!(
            res.text().await.unwrap(),
            "Local received request to path /api/v4/jobs/request"
        );
    }
    assert_eq!(backend.policy_hits(), 0);

    drop(client);
    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_toggle_on_forwards_after_first_poll() {
    let primary = start_primary().await;
    let backend = MockBackend::start().await;
    backend.set_policy(200, format!(r#"{{"primary_url":"http://{}"}}"#, primary));

    let server = HttpServer::new(config(&backend, true)).unwrap();
    let store = server.upstream().policy_store().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.snapshot().enabled() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("poller should publish the enabled policy");

    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://{}/api/v4/jobs/request", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Primary received request to path /api/v4/jobs/request");

    drop(client);
    shutdown.trigger();
    handle.await.unwrap().unwrap();
}
