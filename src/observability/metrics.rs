//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, policy polls)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by decision, status
//! - `proxy_request_duration_seconds` (histogram): latency by decision
//! - `proxy_policy_polls_total` (counter): policy fetches by outcome
//! - `proxy_forwarding_enabled` (gauge): 1=forwarding to primary, 0=local
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so tests need no setup
//! - Labels are static strings plus the status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one served request. `decision` is `"local"` or `"forward"`.
pub fn record_request(decision: &'static str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "decision" => decision,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "decision" => decision)
        .record(start.elapsed().as_secs_f64());
}

/// Record one policy fetch. `outcome` is `"success"` or `"failure"`.
pub fn record_poll(outcome: &'static str) {
    counter!("proxy_policy_polls_total", "outcome" => outcome).increment(1);
}

pub fn record_forwarding_enabled(enabled: bool) {
    gauge!("proxy_forwarding_enabled").set(if enabled { 1.0 } else { 0.0 });
}
