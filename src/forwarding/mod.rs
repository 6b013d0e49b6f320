//! Live-forwarding controller.
//!
//! # Data Flow
//! ```text
//! Poller (poller.rs), one background task:
//!     fetch policy endpoint (bounded timeout)
//!     → success: publish new ForwardingPolicy (policy.rs, atomic swap)
//!     → failure: keep previous policy, log, count
//!     → sleep (injectable), repeat until shutdown
//!
//! Every request:
//!     canonical path + policy snapshot
//!     → decider.rs (exemptions.rs first, then policy)
//!     → Local | Forward(target)
//! ```
//!
//! # Design Decisions
//! - PolicyStore is the only mutable shared state; it is swapped, never mutated
//! - Fail closed: forwarding is off until a poll says otherwise
//! - Exemptions are static configuration, independent of the policy

pub mod decider;
pub mod exemptions;
pub mod policy;
pub mod poller;

pub use decider::{Decision, ForwardingDecider};
pub use exemptions::{default_exemptions, ExemptionConfig, ExemptionError, ExemptionRule};
pub use policy::{ForwardingPolicy, PolicyError, PolicyStore};
pub use poller::{
    stepped, HttpPolicyFetcher, PolicyFetcher, PollError, PollResult, Poller, PollerBuilder,
    SleepController, Sleep, SteppedSleep, TokioSleep,
};
