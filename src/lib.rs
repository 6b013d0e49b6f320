//! Request routing and live forwarding for a secondary-site reverse proxy.

pub mod config;
pub mod forwarding;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use forwarding::{Decision, ForwardingDecider, ForwardingPolicy, PolicyStore, Poller};
pub use http::{HttpServer, UpstreamServer};
pub use lifecycle::Shutdown;
pub use routing::{normalize, RouteTable};
