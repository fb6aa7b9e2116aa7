use std::time::Duration;

use thiserror::Error;

/// Failures raised while reaching or querying a review model.
///
/// None of these are fatal to arbitration: the evaluator maps every variant
/// to an unavailable model and falls back to the heuristic verdict.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter was configured with a malformed URL or model name.
    #[error("adapter misconfigured: {0}")]
    Configuration(String),
    /// The endpoint guard refused the target host.
    #[error("endpoint refused: {0}")]
    EndpointBlocked(String),
    /// The review prompt could not be built or encoded.
    #[error("invalid review prompt: {0}")]
    InvalidPrompt(String),
    /// The model did not answer within its deadline.
    #[error("model timed out after {0:?}")]
    Timeout(Duration),
    /// Connection or I/O failure talking to the model host.
    #[error("model unreachable: {0}")]
    Unreachable(String),
    /// The model answered with an error status or an undecodable body.
    #[error("model replied with an error: {0}")]
    Rejected(String),
}

impl AdapterError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub(crate) fn blocked(reason: impl Into<String>) -> Self {
        Self::EndpointBlocked(reason.into())
    }

    /// Connection-level failure with the given reason.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable(reason.into())
    }

    /// Whether retrying later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unreachable(_))
    }
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_are_transient() {
        assert!(AdapterError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(AdapterError::unreachable("connection reset").is_transient());
        assert!(!AdapterError::blocked("10.0.0.1").is_transient());
        assert!(!AdapterError::Rejected("model not found".into()).is_transient());
    }
}
