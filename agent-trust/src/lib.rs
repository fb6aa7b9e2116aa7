//! Agent reputation for the governance core.
//!
//! Scores follow a three-stage model (calculus, knowledge and
//! identification based trust). Every write is a version-checked
//! read-modify-write wrapped in [`RetryPolicy::run`], so concurrent updates to
//! the same agent are either all applied or surface
//! [`TrustError::RetriesExhausted`].

#![warn(missing_docs, clippy::pedantic)]

mod engine;
mod error;
pub mod model;
pub mod repository;
pub mod retry;

pub use engine::TrustEngine;
pub use error::{TrustError, TrustResult};
pub use model::{AgentIdentity, TrustOutcome, TrustScore};
pub use repository::{AgentRepository, InMemoryAgentRepository, SqliteAgentRepository};
pub use retry::{RetryError, RetryPolicy};
