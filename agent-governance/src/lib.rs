//! Human-facing governance services layered over the ledger, trust engine and
//! policy engine.
//!
//! - [`L3ApprovalService`]: SLA-bound approval queue for high-risk changes.
//! - [`GovernanceAdapter`]: synchronous preflight with replay-protection
//!   nonces and transparency events.
//! - [`BreakGlassProtocol`]: time-boxed emergency mode overrides.
//! - [`ReplayEngine`]: re-evaluates recorded decisions to surface drift.
//! - [`RetentionSweeper`]: keeps in-memory governance state bounded.

#![warn(missing_docs, clippy::pedantic)]

pub mod adapter;
pub mod break_glass;
mod error;
pub mod intent;
pub mod l3;
pub mod nonce;
pub mod replay;
pub mod retention;

pub use adapter::{ActionKind, GovernanceAdapter, GovernanceDecision, GovernanceRequest};
pub use break_glass::{
    BreakGlassProtocol, BreakGlassRecord, BreakGlassRequest, BreakGlassStatus, ModeCallback,
};
pub use error::{GovernanceError, GovernanceResult};
pub use intent::IntentRegistry;
pub use l3::{L3ApprovalRequest, L3ApprovalService, L3Decision, L3State, L3Submission};
pub use nonce::{NonceCheck, NonceStore};
pub use replay::{ReplayBatch, ReplayEngine, ReplayResult, ReplayWarning};
pub use retention::{RetentionSweeper, SweepReport};
