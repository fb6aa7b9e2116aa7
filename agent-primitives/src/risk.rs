//! Risk grades on the ledger scale and the routing subsystem scale.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Ascending sensitivity classification of a change.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RiskGrade {
    /// Low-risk change (documentation, tests).
    L1,
    /// Ordinary source change.
    L2,
    /// Security-sensitive change requiring human approval.
    L3,
}

impl RiskGrade {
    /// Returns the wire name (`L1`, `L2`, `L3`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        }
    }
}

impl Display for RiskGrade {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskGrade {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L1" => Ok(Self::L1),
            "L2" => Ok(Self::L2),
            "L3" => Ok(Self::L3),
            other => Err(Error::unknown("risk grade", other)),
        }
    }
}

/// Risk scale used by the independent routing subsystem.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RoutingRisk {
    /// Trivial change.
    R0,
    /// Minor change.
    R1,
    /// Moderate change.
    R2,
    /// Critical change.
    R3,
}

impl RoutingRisk {
    /// Maps the routing scale onto the ledger scale.
    #[must_use]
    pub const fn to_risk_grade(self) -> RiskGrade {
        match self {
            Self::R0 | Self::R1 => RiskGrade::L1,
            Self::R2 => RiskGrade::L2,
            Self::R3 => RiskGrade::L3,
        }
    }
}

impl From<RoutingRisk> for RiskGrade {
    fn from(value: RoutingRisk) -> Self {
        value.to_risk_grade()
    }
}

impl FromStr for RoutingRisk {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "R0" => Ok(Self::R0),
            "R1" => Ok(Self::R1),
            "R2" => Ok(Self::R2),
            "R3" => Ok(Self::R3),
            other => Err(Error::unknown("routing risk", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_scale_maps_onto_ledger_scale() {
        assert_eq!(RoutingRisk::R0.to_risk_grade(), RiskGrade::L1);
        assert_eq!(RoutingRisk::R1.to_risk_grade(), RiskGrade::L1);
        assert_eq!(RoutingRisk::R2.to_risk_grade(), RiskGrade::L2);
        assert_eq!(RiskGrade::from(RoutingRisk::R3), RiskGrade::L3);
    }

    #[test]
    fn grades_are_ordered_by_sensitivity() {
        assert!(RiskGrade::L1 < RiskGrade::L2);
        assert!(RiskGrade::L2 < RiskGrade::L3);
        assert_eq!("L3".parse::<RiskGrade>().unwrap(), RiskGrade::L3);
        assert!("L4".parse::<RiskGrade>().is_err());
    }
}
