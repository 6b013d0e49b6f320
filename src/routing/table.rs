//! Ordered route table and local dispatch.
//!
//! # Responsibilities
//! - Store compiled `(method, pattern, handler)` bindings in registration order
//! - Look up the first binding matching a canonical path
//! - Invoke the matched handler (or the fallback) with the original request
//!
//! # Design Decisions
//! - Immutable after `build()` (shared via `Arc`, no locks)
//! - Patterns are anchored full-path regexes; an empty pattern is a catch-all
//! - First match wins, so specific routes must be registered before general ones
//! - Malformed patterns fail the build, never a request

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use regex::Regex;

/// Anything that turns a request into a response.
///
/// Implemented for async closures taking `Request<Body>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request<Body>) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        Box::pin((self)(req))
    }
}

/// Canonical path the routing decision was made against.
///
/// Inserted into the request extensions before a local handler runs; the
/// request URI itself is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPath(pub String);

/// Error raised while building a route table.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub enum RoutePattern {
    /// Empty pattern, matches every path.
    CatchAll,
    /// Anchored regular expression.
    Regex(Regex),
}

impl RoutePattern {
    /// Compile a pattern. The empty string yields [`RoutePattern::CatchAll`];
    /// anything else is wrapped as `\A(?:pattern)\z`.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if pattern.is_empty() {
            return Ok(Self::CatchAll);
        }

        Regex::new(&format!(r"\A(?:{})\z", pattern))
            .map(Self::Regex)
            .map_err(|source| RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::CatchAll => true,
            Self::Regex(regex) => regex.is_match(path),
        }
    }
}

/// A single binding in the table.
struct RouteEntry {
    pattern: String,
    method: Option<Method>,
    compiled: RoutePattern,
    handler: Arc<dyn Handler>,
}

impl RouteEntry {
    fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(required) = &self.method {
            if required != method {
                return false;
            }
        }
        self.compiled.matches(path)
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable route table.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    fallback: Arc<dyn Handler>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Index of the first entry matching `method` and `canonical_path`.
    pub fn find(&self, method: &Method, canonical_path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.matches(method, canonical_path))
    }

    /// Dispatch the original request using a routing decision made against
    /// `canonical_path`.
    pub fn dispatch(&self, canonical_path: &str, mut req: Request<Body>) -> BoxFuture<'static, Response> {
        let handler = match self.find(req.method(), canonical_path) {
            Some(index) => {
                let entry = &self.entries[index];
                tracing::debug!(
                    path = %canonical_path,
                    pattern = %entry.pattern,
                    "Route matched"
                );
                entry.handler.clone()
            }
            None => {
                tracing::debug!(path = %canonical_path, "No route matched, using fallback");
                self.fallback.clone()
            }
        };

        req.extensions_mut()
            .insert(CanonicalPath(canonical_path.to_string()));
        handler.call(req)
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

/// Startup-time builder for [`RouteTable`].
#[derive(Default)]
pub struct RouteTableBuilder {
    entries: Vec<RouteEntry>,
    fallback: Option<Arc<dyn Handler>>,
}

impl RouteTableBuilder {
    /// Register a route for any method.
    pub fn route(self, pattern: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.push(None, pattern, Arc::new(handler))
    }

    /// Register a route restricted to one method.
    pub fn route_method(
        self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<Self, RouteError> {
        self.push(Some(method), pattern, Arc::new(handler))
    }

    /// Register a route with an already shared handler.
    pub fn route_shared(
        self,
        method: Option<Method>,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RouteError> {
        self.push(method, pattern, handler)
    }

    /// Handler used when no entry matches. Defaults to a plain 404.
    pub fn fallback(mut self, handler: impl Handler) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            entries: self.entries,
            fallback: self
                .fallback
                .unwrap_or_else(|| Arc::new(not_found) as Arc<dyn Handler>),
        }
    }

    fn push(
        mut self,
        method: Option<Method>,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RouteError> {
        let compiled = RoutePattern::parse(pattern)?;
        self.entries.push(RouteEntry {
            pattern: pattern.to_string(),
            method,
            compiled,
            handler,
        });
        Ok(self)
    }
}

/// Default fallback handler.
pub async fn not_found(_req: Request<Body>) -> Response {
    (StatusCode::NOT_FOUND, "No matching route found").into_response()
}
