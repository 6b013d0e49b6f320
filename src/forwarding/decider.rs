//! Local-versus-forward decision.

use url::Url;

use crate::forwarding::exemptions::ExemptionRule;
use crate::forwarding::policy::ForwardingPolicy;

/// Where a request should be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch through the local route table.
    Local,
    /// Relay to the primary at this base URL.
    Forward(Url),
}

/// Pure decision function over a canonical path and a policy snapshot.
///
/// Exemptions take precedence over the policy.
#[derive(Debug, Clone, Default)]
pub struct ForwardingDecider {
    exemptions: Vec<ExemptionRule>,
}

impl ForwardingDecider {
    pub fn new(exemptions: Vec<ExemptionRule>) -> Self {
        Self { exemptions }
    }

    pub fn is_exempt(&self, canonical_path: &str) -> bool {
        self.exemptions
            .iter()
            .any(|rule| rule.matches(canonical_path))
    }

    pub fn decide(&self, canonical_path: &str, policy: &ForwardingPolicy) -> Decision {
        if self.is_exempt(canonical_path) {
            return Decision::Local;
        }

        match policy.target() {
            Some(target) => Decision::Forward(target.clone()),
            None => Decision::Local,
        }
    }
}
