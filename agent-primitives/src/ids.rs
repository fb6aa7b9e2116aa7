//! Agent identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const DID_METHOD_PREFIX: &str = "did:myth:";
const MAX_DID_LEN: usize = 256;
const FINGERPRINT_HEX_LEN: usize = 16;

/// Closed set of roles an agent may play inside the governance loop.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// Authors changes (the default persona for coding agents).
    Scrivener,
    /// Runs automated verification over changes.
    Sentinel,
    /// Arbitrates disputed verdicts.
    Judge,
    /// Human-aligned authority for L3 approvals.
    Overseer,
}

impl Persona {
    /// All personas in declaration order.
    pub const ALL: [Self; 4] = [Self::Scrivener, Self::Sentinel, Self::Judge, Self::Overseer];

    /// Returns the lowercase wire name of the persona.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scrivener => "scrivener",
            Self::Sentinel => "sentinel",
            Self::Judge => "judge",
            Self::Overseer => "overseer",
        }
    }
}

impl Display for Persona {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|persona| persona.as_str() == s)
            .ok_or_else(|| Error::unknown("persona", s))
    }
}

/// Decentralized identifier naming an agent.
///
/// Identifiers minted by [`AgentDid::derive`] take the form
/// `did:myth:<persona>:<fingerprint>`, where the fingerprint is the first 16 hex
/// characters of `SHA-256("<persona>:<public key>")`. Externally supplied DIDs
/// only need the `did:` scheme; their persona may then be unknown.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentDid(String);

impl AgentDid {
    /// Derives a DID deterministically from a persona and a public key.
    #[must_use]
    pub fn derive(persona: Persona, public_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(persona.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(public_key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!(
            "{DID_METHOD_PREFIX}{persona}:{}",
            &digest[..FINGERPRINT_HEX_LEN]
        ))
    }

    /// Validates and wraps an existing DID string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDid`] when the value is empty, too long, lacks the
    /// `did:` scheme, or contains whitespace or control characters.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let reason = if value.is_empty() {
            Some("identifier cannot be empty".to_owned())
        } else if value.len() > MAX_DID_LEN {
            Some(format!("identifier length must be <= {MAX_DID_LEN}"))
        } else if !value.starts_with("did:") {
            Some("identifier must use the `did:` scheme".to_owned())
        } else if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            Some("identifier must not contain whitespace".to_owned())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidDid { did: value, reason }),
            None => Ok(Self(value)),
        }
    }

    /// Returns the persona embedded in a `did:myth:` identifier, if any.
    #[must_use]
    pub fn persona(&self) -> Option<Persona> {
        let rest = self.0.strip_prefix(DID_METHOD_PREFIX)?;
        let segment = rest.split(':').next()?;
        segment.parse().ok()
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AgentDid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentDid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentDid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<AgentDid> for String {
    fn from(value: AgentDid) -> Self {
        value.0
    }
}

impl AsRef<str> for AgentDid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_and_embeds_persona() {
        let a = AgentDid::derive(Persona::Scrivener, "pk-123");
        let b = AgentDid::derive(Persona::Scrivener, "pk-123");
        let c = AgentDid::derive(Persona::Sentinel, "pk-123");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("did:myth:scrivener:"));
        assert_eq!(a.as_str().len(), "did:myth:scrivener:".len() + 16);
        assert_eq!(a.persona(), Some(Persona::Scrivener));
        assert_eq!(c.persona(), Some(Persona::Sentinel));
    }

    #[test]
    fn parse_rejects_malformed_identifiers() {
        assert!(AgentDid::parse("").is_err());
        assert!(AgentDid::parse("agent-7").is_err());
        assert!(AgentDid::parse("did:myth:judge:ab cd").is_err());

        let external = AgentDid::parse("did:web:example.com").unwrap();
        assert_eq!(external.persona(), None);
    }

    #[test]
    fn persona_round_trips_through_strings() {
        for persona in Persona::ALL {
            assert_eq!(persona.as_str().parse::<Persona>().unwrap(), persona);
        }
        assert!("admin".parse::<Persona>().is_err());
    }

    #[test]
    fn did_serializes_transparently() {
        let did = AgentDid::derive(Persona::Overseer, "key");
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, format!("\"{did}\""));
        let back: AgentDid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
        assert!(serde_json::from_str::<AgentDid>("\"nope\"").is_err());
    }
}
