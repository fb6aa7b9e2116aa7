//! Risk classification and verification policy for governed agent changes.
//!
//! [`PolicyEngine`] grades a change from its path and content, looks up the
//! verification it requires, and exposes a short digest of its configuration
//! so that replays can detect policy drift.

#![warn(missing_docs, clippy::pedantic)]

pub mod contracts;
pub mod decision;
pub mod engine;
mod error;

pub use contracts::{OVERRIDES_FILE, PolicyConfig, PolicyRequest, TriggerList};
pub use decision::{
    DecisionKind, PolicyDecision, SamplingPlan, VerificationMethod, VerificationRequirement,
};
pub use engine::{Classification, ESCALATION_APPROVER, PolicyEngine};
pub use error::{PolicyError, PolicyResult};
