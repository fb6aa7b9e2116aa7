use agent_ledger::LedgerError;
use thiserror::Error;

/// Errors raised by the arbitration pipeline.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// A pattern failed the backtracking pre-screen or did not compile.
    #[error("pattern `{id}` rejected: {reason}")]
    PatternRejected {
        /// Pattern identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Pattern file I/O failed.
    #[error("failed to read patterns: {0}")]
    Io(#[from] std::io::Error),
    /// Pattern file was not valid JSON.
    #[error("invalid pattern file: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Ledger write failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl SentinelError {
    pub(crate) fn rejected(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PatternRejected {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for sentinel operations.
pub type SentinelResult<T> = Result<T, SentinelError>;

/// Failure to hand an escalated verdict to the approval queue.
#[derive(Debug, Error)]
#[error("escalation failed: {0}")]
pub struct EscalationError(pub String);
