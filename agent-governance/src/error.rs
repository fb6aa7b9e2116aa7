use agent_config::ConfigError;
use agent_ledger::LedgerError;
use agent_trust::TrustError;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for governance operations.
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Errors surfaced to callers of the governance services.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A break-glass request failed validation; nothing was written.
    #[error("invalid break-glass request: {0}")]
    Validation(String),

    /// A break-glass override is already in force.
    #[error("a break-glass override is already active until {expires_at}")]
    OverrideActive {
        /// Expiry of the active override.
        expires_at: DateTime<Utc>,
    },

    /// There is no active override to revoke.
    #[error("no break-glass override is active")]
    NoActiveOverride,

    /// No queued L3 request has this id.
    #[error("L3 approval request {0} not found")]
    L3NotFound(Uuid),

    /// The ledger entry cannot be replayed.
    #[error("ledger entry {id} cannot be replayed: {reason}")]
    NotReplayable {
        /// Entry id.
        id: i64,
        /// Why.
        reason: String,
    },

    /// Persisted state could not be decoded.
    #[error("corrupt persisted state: {0}")]
    CorruptState(#[from] serde_json::Error),

    /// The state store failed.
    #[error(transparent)]
    State(#[from] ConfigError),

    /// The ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The trust engine failed.
    #[error(transparent)]
    Trust(#[from] TrustError),
}

impl GovernanceError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}
