use agent_ledger::LedgerError;
use agent_primitives::AgentDid;
use thiserror::Error;

/// Result alias for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;

/// Errors surfaced by the trust engine and its repositories.
#[derive(Debug, Error)]
pub enum TrustError {
    /// A conditional write found a different version than expected.
    #[error("trust record for {did} changed concurrently (expected version {expected})")]
    VersionConflict {
        /// Agent whose row conflicted.
        did: AgentDid,
        /// Version the writer expected.
        expected: i64,
    },

    /// Conflicts persisted after every retry.
    #[error("trust update for {did} abandoned after {attempts} conflicting attempts")]
    RetriesExhausted {
        /// Agent whose update was abandoned.
        did: AgentDid,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// The agent is not registered.
    #[error("agent {0} is not registered")]
    NotFound(AgentDid),

    /// The agent was revoked and its trust can no longer change.
    #[error("agent {0} has been revoked")]
    Revoked(AgentDid),

    /// A stored trust row could not be decoded.
    #[error("malformed trust record for {did}: {reason}")]
    Malformed {
        /// Row key.
        did: String,
        /// Decoding failure.
        reason: String,
    },

    /// Storage failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl TrustError {
    /// Whether the error is an optimistic-lock conflict worth retrying.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<rusqlite::Error> for TrustError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Ledger(LedgerError::Database(err))
    }
}
