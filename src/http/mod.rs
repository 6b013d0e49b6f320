//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup from ProxyConfig, request ID, timeout, tracing)
//!     → upstream.rs (normalize, decide against one policy snapshot)
//!     → forward.rs (relay to primary or backend)   |   RouteTable handler
//!     → Send to client
//! ```

pub mod forward;
pub mod server;
pub mod upstream;

pub use forward::{BackendHandler, ForwardError, Forwarder};
pub use server::{health, BuildError, HttpServer};
pub use upstream::{UpstreamServer, UpstreamServerBuilder};
