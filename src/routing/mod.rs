//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (raw path)
//!     → normalize.rs (single decode pass, dot segments clamped at root)
//!     → table.rs (first matching pattern in registration order)
//!     → matched handler, or the fallback
//!
//! Route compilation (at startup):
//!     (method?, pattern, handler)[]
//!     → compile anchored regexes
//!     → freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Matching runs against the canonical path, handlers get the original request
//! - First match wins (registration order)
//! - Unmatched paths are not an error: the fallback serves them

pub mod normalize;
pub mod table;

pub use normalize::normalize;
pub use table::{
    not_found, CanonicalPath, Handler, RouteError, RoutePattern, RouteTable,
    RouteTableBuilder,
};
