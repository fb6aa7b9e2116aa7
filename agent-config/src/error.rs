//! Error types for configuration and persistence collaborators.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by configuration, secret, and state stores.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The supplied configuration failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Underlying I/O failure.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// A secret key contained characters that cannot be mapped to storage.
    #[error("invalid secret key `{0}`")]
    InvalidSecretKey(String),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
