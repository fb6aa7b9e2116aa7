//! Shared error definitions for governance primitives.

use thiserror::Error;

/// Result alias used throughout the governance workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or validating primitive types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The provided agent DID failed validation.
    #[error("invalid agent did `{did}`: {reason}")]
    InvalidDid {
        /// The offending identifier string.
        did: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A string did not name one of the closed enumeration values.
    #[error("unknown {kind} `{value}`")]
    UnknownVariant {
        /// Name of the enumeration being parsed.
        kind: &'static str,
        /// The unrecognised input.
        value: String,
    },
}

impl Error {
    pub(crate) fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
