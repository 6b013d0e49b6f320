//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile route and exemption patterns once so bad ones fail at startup
//! - Validate value ranges (intervals and timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::Method;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::forwarding::exemptions::{ExemptionError, ExemptionRule};
use crate::routing::{RouteError, RoutePattern};

/// A single semantic problem in the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid backend url '{url}': {reason}")]
    InvalidBackend { url: String, reason: String },

    #[error("route {index}: {source}")]
    Route {
        index: usize,
        #[source]
        source: RouteError,
    },

    #[error("route {index}: invalid method '{method}'")]
    RouteMethod { index: usize, method: String },

    #[error("exemption {index}: {source}")]
    Exemption {
        index: usize,
        #[source]
        source: ExemptionError,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("forwarding.policy_path '{0}' must start with '/'")]
    PolicyPath(String),
}

/// Check a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if let Err(reason) = parse_backend(&config.backend.url) {
        errors.push(ValidationError::InvalidBackend {
            url: config.backend.url.clone(),
            reason,
        });
    }

    for (index, route) in config.routes.iter().enumerate() {
        if let Err(source) = RoutePattern::parse(&route.pattern) {
            errors.push(ValidationError::Route { index, source });
        }
        if let Some(method) = &route.method {
            if Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::RouteMethod {
                    index,
                    method: method.clone(),
                });
            }
        }
    }

    for (index, exemption) in config.forwarding.exemptions.iter().enumerate() {
        if let Err(source) = ExemptionRule::try_from(exemption) {
            errors.push(ValidationError::Exemption { index, source });
        }
    }

    if !config.forwarding.policy_path.starts_with('/') {
        errors.push(ValidationError::PolicyPath(config.forwarding.policy_path.clone()));
    }

    let durations = [
        ("forwarding.interval_secs", config.forwarding.interval_secs),
        ("forwarding.fetch_timeout_secs", config.forwarding.fetch_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.forward_secs", config.timeouts.forward_secs),
    ];
    for (field, value) in durations {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse the backend base URL; only plain HTTP backends are supported.
pub fn parse_backend(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}
