//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::forwarding::exemptions::{default_exemptions, ExemptionConfig};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Local application backend.
    pub backend: BackendConfig,

    /// Local routes, matched in order before the backend fallback.
    pub routes: Vec<RouteConfig>,

    /// Live forwarding to a primary instance.
    pub forwarding: ForwardingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8181").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8181".to_string(),
        }
    }
}

/// The application backend serving local requests and the policy endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL (e.g., "http://127.0.0.1:8080").
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// A local route binding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Anchored regex over the canonical path; empty matches everything.
    pub pattern: String,

    /// Optional method restriction (e.g., "GET").
    #[serde(default)]
    pub method: Option<String>,

    /// What serves matching requests.
    #[serde(default)]
    pub handler: HandlerKind,
}

/// Built-in local handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Relay to the local backend.
    #[default]
    Backend,
    /// Answer 200 from the proxy itself.
    Health,
    /// Answer 404.
    NotFound,
}

/// Live forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Feature toggle. When off the policy endpoint is never polled.
    pub enabled: bool,

    /// Policy endpoint path on the backend.
    pub policy_path: String,

    /// Poll interval in seconds.
    pub interval_secs: u64,

    /// Per-fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Paths always served locally.
    pub exemptions: Vec<ExemptionConfig>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy_path: "/api/v4/geo/proxy".to_string(),
            interval_secs: 10,
            fetch_timeout_secs: 5,
            exemptions: default_exemptions(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Inbound request deadline in seconds.
    pub request_secs: u64,

    /// Wait for upstream response headers in seconds.
    pub forward_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            forward_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
