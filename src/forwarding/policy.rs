//! Forwarding policy snapshots and their atomic publication.
//!
//! # Responsibilities
//! - Represent the current forwarding policy as an immutable value
//! - Parse the backend's policy document
//! - Publish new snapshots with a single pointer swap
//!
//! # Design Decisions
//! - "Enabled" is `target.is_some()`, so an enabled policy without a target
//!   cannot be constructed
//! - Starts disabled (fail closed) until the first successful poll
//! - Readers load one `Arc` per request and never re-read mid-request

use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use serde::Deserialize;
use url::Url;

/// Error parsing the policy document returned by the backend.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("policy body is not a JSON object")]
    NotAnObject,

    #[error("invalid primary url '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },
}

/// Wire format of the policy endpoint.
#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(default, alias = "geo_proxy_url")]
    primary_url: Option<String>,
}

/// One immutable forwarding policy snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingPolicy {
    target: Option<Url>,
    fetched_at: Option<SystemTime>,
}

impl ForwardingPolicy {
    /// The startup policy: forwarding off, never fetched.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A freshly fetched policy. `None` means the backend reported no
    /// active forwarding.
    pub fn fetched(target: Option<Url>) -> Self {
        Self {
            target,
            fetched_at: Some(SystemTime::now()),
        }
    }

    /// Parse a policy document body.
    ///
    /// A missing, null or empty `primary_url` yields a disabled policy.
    pub fn from_body(body: &[u8]) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        if !value.is_object() {
            return Err(PolicyError::NotAnObject);
        }

        let document: PolicyDocument = serde_json::from_value(value)?;
        let target = match document.primary_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_target(raw)?),
        };

        Ok(Self::fetched(target))
    }

    pub fn enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    pub fn fetched_at(&self) -> Option<SystemTime> {
        self.fetched_at
    }

    /// Same enabled state and target, ignoring fetch time.
    pub fn same_target(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

fn parse_target(raw: &str) -> Result<Url, PolicyError> {
    let invalid = |reason: String| PolicyError::InvalidTarget {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    // The request path and query are appended to the target verbatim.
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query or fragment not allowed".to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("credentials not allowed".to_string()));
    }
    Ok(url)
}

/// Single-writer, multi-reader holder of the current policy.
///
/// Cloning shares the same underlying slot.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    current: Arc<ArcSwap<ForwardingPolicy>>,
}

impl PolicyStore {
    /// A store holding the disabled startup policy.
    pub fn new() -> Self {
        Self::with_policy(ForwardingPolicy::disabled())
    }

    pub fn with_policy(policy: ForwardingPolicy) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(policy)),
        }
    }

    /// The current snapshot. Take it once per request.
    pub fn snapshot(&self) -> Arc<ForwardingPolicy> {
        self.current.load_full()
    }

    /// Replace the whole policy, returning the previous snapshot.
    pub fn publish(&self, policy: ForwardingPolicy) -> Arc<ForwardingPolicy> {
        self.current.swap(Arc::new(policy))
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_disabled() {
        let policy = ForwardingPolicy::from_body(b"{}").unwrap();
        assert!(!policy.enabled());
        assert!(policy.fetched_at().is_some());
    }

    #[test]
    fn test_primary_url_enables() {
        let policy = ForwardingPolicy::from_body(br#"{"primary_url":"http://primary.example:8080"}"#).unwrap();
        assert!(policy.enabled());
        assert_eq!(policy.target().unwrap().as_str(), "http://primary.example:8080/");
    }

    #[test]
    fn test_geo_alias_accepted() {
        let policy = ForwardingPolicy::from_body(br#"{"geo_proxy_url":"http://primary"}"#).unwrap();
        assert_eq!(policy.target().unwrap().host_str(), Some("primary"));
    }

    #[test]
    fn test_empty_or_null_url_is_disabled() {
        assert!(!ForwardingPolicy::from_body(br#"{"primary_url":""}"#).unwrap().enabled());
        assert!(!ForwardingPolicy::from_body(br#"{"primary_url":null}"#).unwrap().enabled());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let policy = ForwardingPolicy::from_body(br#"{"something_else":true}"#).unwrap();
        assert!(!policy.enabled());
    }

    #[test]
    fn test_malformed_bodies_rejected() {
        assert!(matches!(
            ForwardingPolicy::from_body(b"Invalid response"),
            Err(PolicyError::Json(_))
        ));
        assert!(matches!(
            ForwardingPolicy::from_body(b"[]"),
            Err(PolicyError::NotAnObject)
        ));
        assert!(matches!(
            ForwardingPolicy::from_body(br#"{"primary_url":42}"#),
            Err(PolicyError::Json(_))
        ));
        assert!(matches!(
            ForwardingPolicy::from_body(br#"{"primary_url":"ftp://primary"}"#),
            Err(PolicyError::InvalidTarget { .. })
        ));
        assert!(matches!(
            ForwardingPolicy::from_body(br#"{"primary_url":"not a url"}"#),
            Err(PolicyError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_target_with_query_fragment_or_credentials_rejected() {
        for body in [
            r#"{"primary_url":"http://x/?a"}"#,
            r#"{"primary_url":"http://x/#top"}"#,
            r#"{"primary_url":"http://user:secret@x/"}"#,
            r#"{"primary_url":"http://user@x/"}"#,
        ] {
            assert!(
                matches!(
                    ForwardingPolicy::from_body(body.as_bytes()),
                    Err(PolicyError::InvalidTarget { .. })
                ),
                "accepted {body}"
            );
        }
        assert!(ForwardingPolicy::from_body(br#"{"primary_url":"http://x/gitlab/"}"#)
            .unwrap()
            .enabled());
    }

    #[test]
    fn test_store_starts_disabled_and_swaps() {
        let store = PolicyStore::new();
        assert!(!store.snapshot().enabled());
        assert!(store.snapshot().fetched_at().is_none());

        let before = store.snapshot();
        let target = Url::parse("http://primary").unwrap();
        let previous = store.publish(ForwardingPolicy::fetched(Some(target.clone())));

        assert!(!previous.enabled());
        assert_eq!(store.snapshot().target(), Some(&target));
        // Snapshots already handed out are unaffected.
        assert!(!before.enabled());
    }

    #[test]
    fn test_clones_share_state() {
        let store = PolicyStore::new();
        let reader = store.clone();
        store.publish(ForwardingPolicy::fetched(Some(Url::parse("http://x").unwrap())));
        assert!(reader.snapshot().enabled());
    }
}
