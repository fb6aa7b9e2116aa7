use thiserror::Error;

/// Errors surfaced while loading policy configuration.
///
/// Classification itself never fails.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Override file could not be read.
    #[error("failed to read policy overrides: {0}")]
    Io(#[from] std::io::Error),
    /// Override file is not valid JSON for the policy schema.
    #[error("invalid policy overrides: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Override file parsed but failed validation.
    #[error("invalid policy rule: {0}")]
    InvalidRule(String),
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
