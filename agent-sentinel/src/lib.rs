//! Arbitration of agent-authored file changes.
//!
//! A [`SentinelEvent`] flows through the [`VerdictArbiter`], which combines
//! regex and complexity heuristics, claimed-path existence checks and an
//! optional LLM review into a [`SentinelVerdict`](agent_primitives::SentinelVerdict).
//! The [`VerdictRouter`] publishes every verdict, records it in the ledger and
//! hands escalations to an [`EscalationQueue`]. [`SentinelDaemon`] drives the
//! pipeline from a bounded priority queue.

#![warn(missing_docs, clippy::pedantic)]

pub mod arbiter;
pub mod daemon;
mod error;
pub mod event;
pub mod existence;
pub mod heuristic;
pub mod llm;
pub mod patterns;
pub mod queue;
pub mod router;

pub use arbiter::{Assessment, VerdictArbiter};
pub use daemon::{Processed, SentinelDaemon};
pub use error::{EscalationError, SentinelError, SentinelResult};
pub use event::{EventPriority, SentinelEvent};
pub use existence::{ClaimFinding, ClaimReport, ClaimViolation, ExistenceEngine};
pub use heuristic::{HeuristicEngine, HeuristicFinding, HeuristicReport};
pub use llm::{LlmDecision, LlmEvaluator, LlmOutcome, llm_confidence};
pub use patterns::{CompiledPattern, PatternDefinition, PatternLoader};
pub use queue::{Admission, PriorityEventQueue, QueueStats};
pub use router::{EscalationQueue, EscalationStatus, RouteOutcome, VerdictRouter};
