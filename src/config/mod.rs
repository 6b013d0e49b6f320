//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → HttpServer::new builds routes, exemptions and the poller from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, ForwardingConfig, HandlerKind, ListenerConfig, ObservabilityConfig,
    ProxyConfig, RouteConfig, TimeoutConfig,
};
pub use validation::{parse_backend, validate_config, ValidationError};
