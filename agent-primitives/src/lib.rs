//! Core shared types for the agent governance engine.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod event;
mod ids;
mod mode;
mod risk;
mod trust;
mod verdict;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Closed vocabulary of ledger and bus event types.
pub use event::LedgerEventType;
/// Decentralized agent identifiers and personas.
pub use ids::{AgentDid, Persona};
/// Governance, operational, and arbitration modes.
pub use mode::{ArbiterMode, GovernanceMode, OperationalMode};
/// Risk grades on the ledger scale and the routing scale.
pub use risk::{RiskGrade, RoutingRisk};
/// Reputation stages and their score breakpoints.
pub use trust::{IBT_THRESHOLD, KBT_THRESHOLD, TrustStage};
/// Sentinel verdicts emitted by the arbitration pipeline.
pub use verdict::{SentinelVerdict, SentinelVerdictBuilder, Severity, VerdictDecision};
