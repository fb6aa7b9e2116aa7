//! Closed vocabulary of governance event types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Event types recorded in the ledger.
///
/// New business events must be added here rather than encoded in payloads so
/// replay and audit queries stay well-typed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEventType {
    /// Lifecycle or housekeeping event emitted by the engine itself.
    SystemEvent,
    /// A new agent identity was registered.
    AgentRegistered,
    /// An agent's trust score changed.
    TrustUpdate,
    /// An agent entered quarantine.
    QuarantineStart,
    /// An agent left quarantine.
    QuarantineEnd,
    /// An agent was permanently revoked.
    AgentRevoked,
    /// A sentinel verdict was routed.
    EvaluationRouted,
    /// An L3 approval request was queued.
    L3Queued,
    /// An L3 approval request was approved.
    L3Approved,
    /// An L3 approval request was rejected.
    L3Rejected,
    /// Governance allowed an action to proceed.
    GovernanceResumed,
    /// Governance paused an action pending approval.
    GovernancePaused,
    /// A break-glass override was activated, revoked, or expired.
    UserOverride,
}

impl LedgerEventType {
    /// Every event type in declaration order.
    pub const ALL: [Self; 13] = [
        Self::SystemEvent,
        Self::AgentRegistered,
        Self::TrustUpdate,
        Self::QuarantineStart,
        Self::QuarantineEnd,
        Self::AgentRevoked,
        Self::EvaluationRouted,
        Self::L3Queued,
        Self::L3Approved,
        Self::L3Rejected,
        Self::GovernanceResumed,
        Self::GovernancePaused,
        Self::UserOverride,
    ];

    /// Returns the persisted tag for the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SystemEvent => "SYSTEM_EVENT",
            Self::AgentRegistered => "AGENT_REGISTERED",
            Self::TrustUpdate => "TRUST_UPDATE",
            Self::QuarantineStart => "QUARANTINE_START",
            Self::QuarantineEnd => "QUARANTINE_END",
            Self::AgentRevoked => "AGENT_REVOKED",
            Self::EvaluationRouted => "EVALUATION_ROUTED",
            Self::L3Queued => "L3_QUEUED",
            Self::L3Approved => "L3_APPROVED",
            Self::L3Rejected => "L3_REJECTED",
            Self::GovernanceResumed => "GOVERNANCE_RESUMED",
            Self::GovernancePaused => "GOVERNANCE_PAUSED",
            Self::UserOverride => "USER_OVERRIDE",
        }
    }
}

impl Display for LedgerEventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| Error::unknown("ledger event type", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_serde_names() {
        for event in LedgerEventType::ALL {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
            assert_eq!(event.as_str().parse::<LedgerEventType>().unwrap(), event);
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let err = "MADE_UP".parse::<LedgerEventType>().unwrap_err();
        assert!(matches!(err, Error::UnknownVariant { .. }));
    }
}
