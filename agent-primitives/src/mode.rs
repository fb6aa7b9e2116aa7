//! Modes that shape how strictly governance is applied.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Workspace-wide governance posture, switched temporarily by break-glass.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceMode {
    /// Record decisions without blocking anything.
    Observe,
    /// Advise and escalate, but let authors proceed.
    Assist,
    /// Block actions that policy does not allow.
    #[default]
    Enforce,
}

impl GovernanceMode {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Assist => "assist",
            Self::Enforce => "enforce",
        }
    }
}

impl Display for GovernanceMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GovernanceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "observe" => Ok(Self::Observe),
            "assist" => Ok(Self::Assist),
            "enforce" => Ok(Self::Enforce),
            other => Err(Error::unknown("governance mode", other)),
        }
    }
}

/// Load-shedding mode that modulates verification sampling.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationalMode {
    /// Standard sampling.
    #[default]
    Normal,
    /// Reduced sampling to save resources.
    Lean,
    /// High load: L1 checks are deferred.
    Surge,
    /// Lockdown: only L3 work is processed, always with human approval.
    Safe,
}

impl OperationalMode {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Lean => "lean",
            Self::Surge => "surge",
            Self::Safe => "safe",
        }
    }
}

impl Display for OperationalMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Self::Normal),
            "lean" => Ok(Self::Lean),
            "surge" => Ok(Self::Surge),
            "safe" => Ok(Self::Safe),
            other => Err(Error::unknown("operational mode", other)),
        }
    }
}

/// Controls when the verdict arbiter consults an LLM.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArbiterMode {
    /// Heuristics only; the LLM is never consulted.
    #[default]
    Heuristic,
    /// The LLM is consulted for every event.
    LlmAssisted,
    /// The LLM is consulted only when heuristics raise a non-low flag.
    Hybrid,
}

impl FromStr for ArbiterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "heuristic" => Ok(Self::Heuristic),
            "llm-assisted" => Ok(Self::LlmAssisted),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::unknown("arbiter mode", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_from_wire_names() {
        assert_eq!("observe".parse::<GovernanceMode>().unwrap(), GovernanceMode::Observe);
        assert_eq!("surge".parse::<OperationalMode>().unwrap(), OperationalMode::Surge);
        assert_eq!("llm-assisted".parse::<ArbiterMode>().unwrap(), ArbiterMode::LlmAssisted);
        assert!("turbo".parse::<OperationalMode>().is_err());
    }

    #[test]
    fn arbiter_mode_uses_kebab_case() {
        let json = serde_json::to_string(&ArbiterMode::LlmAssisted).unwrap();
        assert_eq!(json, "\"llm-assisted\"");
    }
}
