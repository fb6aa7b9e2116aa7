//! Trust stages of the three-stage reputation model.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lower bound of the knowledge-based stage.
pub const KBT_THRESHOLD: f64 = 0.5;
/// Lower bound of the identification-based stage.
pub const IBT_THRESHOLD: f64 = 0.8;

/// Reputation stage derived from a trust score.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TrustStage {
    /// Calculus-based trust, score below 0.5.
    #[serde(rename = "CBT")]
    Cbt,
    /// Knowledge-based trust, score in `[0.5, 0.8)`.
    #[serde(rename = "KBT")]
    Kbt,
    /// Identification-based trust, score of 0.8 or more.
    #[serde(rename = "IBT")]
    Ibt,
}

impl TrustStage {
    /// Derives the stage from a score. Monotone in `score`.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= IBT_THRESHOLD {
            Self::Ibt
        } else if score >= KBT_THRESHOLD {
            Self::Kbt
        } else {
            Self::Cbt
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cbt => "CBT",
            Self::Kbt => "KBT",
            Self::Ibt => "IBT",
        }
    }
}

impl Display for TrustStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CBT" => Ok(Self::Cbt),
            "KBT" => Ok(Self::Kbt),
            "IBT" => Ok(Self::Ibt),
            other => Err(Error::unknown("trust stage", other)),
        }
    }
}
