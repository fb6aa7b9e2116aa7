use thiserror::Error;

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by the ledger store.
///
/// Chain integrity problems are not errors: they are reported through
/// [`ChainReport`](crate::ChainReport).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The secret store failed while loading or persisting the signing key.
    #[error("secret store failure: {0}")]
    Secret(#[from] agent_config::ConfigError),

    /// The stored signing key is malformed.
    #[error("invalid signing key material: {0}")]
    KeyMaterial(String),

    /// No entry exists with the given id.
    #[error("ledger entry not found: id={id}")]
    NotFound {
        /// Requested id.
        id: i64,
    },

    /// A stored row could not be decoded into an entry.
    #[error("ledger row {id} is malformed: {reason}")]
    Malformed {
        /// Row id.
        id: i64,
        /// Decoding failure.
        reason: String,
    },

    /// A blocking-pool task running ledger work panicked or was cancelled.
    #[error("ledger task failed: {0}")]
    Blocking(String),

    /// A thread panicked while holding the connection lock.
    #[error("ledger connection lock poisoned")]
    Poisoned,

    /// The ledger runs in stub mode and has no backing store.
    #[error("ledger unavailable: {reason}")]
    Unavailable {
        /// Why the store could not be opened.
        reason: String,
    },
}
