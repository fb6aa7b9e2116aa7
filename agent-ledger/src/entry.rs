//! Ledger entry model and append requests.

use agent_primitives::{LedgerEventType, RiskGrade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form structured payload attached to an entry.
pub type Payload = Map<String, Value>;

/// `prev_hash` of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// `entry_hash` carried by entries returned while the ledger runs in stub mode.
pub const STUB_HASH: &str = "STUB_DISABLED";

/// Immutable, persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct LedgerEntry {
    /// Monotonic row id; `0` for stub entries.
    pub id: i64,
    /// Append time, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Event type tag.
    pub event_type: LedgerEventType,
    /// Acting agent, or a system principal such as `system`.
    pub agent_did: String,
    /// Agent trust score at the time of the action.
    pub agent_trust_at_action: Option<f64>,
    /// Workspace-relative path of the affected artifact.
    pub artifact_path: Option<String>,
    /// SHA-256 of the artifact content at the time of the action.
    pub artifact_hash: Option<String>,
    /// Risk grade assigned to the action.
    pub risk_grade: Option<RiskGrade>,
    /// Human overseer that decided, for L3 decisions.
    pub overseer_did: Option<String>,
    /// The overseer's decision.
    pub overseer_decision: Option<String>,
    /// Event specific data.
    pub payload: Payload,
    /// Hash of this entry.
    pub entry_hash: String,
    /// Hash of the preceding entry.
    pub prev_hash: String,
    /// Hex HMAC-SHA256 signature.
    pub signature: String,
}

impl LedgerEntry {
    /// Whether this entry was produced in stub mode and is unverifiable.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.entry_hash == STUB_HASH
    }

    /// Returns a payload field as a string, if present.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Boolean payload field, if present and a boolean.
    #[must_use]
    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    pub(crate) fn stub(request: AppendRequest, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: request.event_type,
            agent_did: request.agent_did,
            agent_trust_at_action: request.agent_trust_at_action,
            artifact_path: request.artifact_path,
            artifact_hash: request.artifact_hash,
            risk_grade: request.risk_grade,
            overseer_did: request.overseer_did,
            overseer_decision: request.overseer_decision,
            payload: request.payload,
            entry_hash: STUB_HASH.to_owned(),
            prev_hash: STUB_HASH.to_owned(),
            signature: String::new(),
        }
    }
}

/// Builder describing an entry to append.
#[derive(Debug, Clone)]
#[must_use]
pub struct AppendRequest {
    pub(crate) event_type: LedgerEventType,
    pub(crate) agent_did: String,
    pub(crate) agent_trust_at_action: Option<f64>,
    pub(crate) artifact_path: Option<String>,
    pub(crate) artifact_hash: Option<String>,
    pub(crate) risk_grade: Option<RiskGrade>,
    pub(crate) overseer_did: Option<String>,
    pub(crate) overseer_decision: Option<String>,
    pub(crate) payload: Payload,
}

impl AppendRequest {
    /// Starts a request for `event_type` performed by `agent_did`.
    pub fn new(event_type: LedgerEventType, agent_did: impl Into<String>) -> Self {
        Self {
            event_type,
            agent_did: agent_did.into(),
            agent_trust_at_action: None,
            artifact_path: None,
            artifact_hash: None,
            risk_grade: None,
            overseer_did: None,
            overseer_decision: None,
            payload: Payload::new(),
        }
    }

    /// Records the agent's trust score at action time.
    pub fn trust_at_action(mut self, score: f64) -> Self {
        self.agent_trust_at_action = Some(score);
        self
    }

    /// Records the affected artifact path.
    pub fn artifact_path(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    /// Records the affected artifact's content hash.
    pub fn artifact_hash(mut self, hash: Option<String>) -> Self {
        self.artifact_hash = hash;
        self
    }

    /// Records the assigned risk grade.
    pub fn risk_grade(mut self, grade: RiskGrade) -> Self {
        self.risk_grade = Some(grade);
        self
    }

    /// Records an overseer decision.
    pub fn overseer(mut self, did: impl Into<String>, decision: impl Into<String>) -> Self {
        self.overseer_did = Some(did.into());
        self.overseer_decision = Some(decision.into());
        self
    }

    /// Replaces the payload.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Inserts one payload field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Event type being appended.
    #[must_use]
    pub fn event_type(&self) -> LedgerEventType {
        self.event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_fields() {
        let request = AppendRequest::new(LedgerEventType::L3Queued, "did:myth:scrivener:abc")
            .artifact_path("src/auth.rs")
            .risk_grade(RiskGrade::L3)
            .field("requestId", "r-1")
            .field("flags", vec!["secrets"]);

        assert_eq!(request.event_type(), LedgerEventType::L3Queued);
        assert_eq!(request.payload["requestId"], "r-1");
        assert_eq!(request.payload["flags"][0], "secrets");
    }

    #[test]
    fn stub_entries_are_marked() {
        let entry = LedgerEntry::stub(
            AppendRequest::new(LedgerEventType::SystemEvent, "system"),
            Utc::now(),
        );
        assert!(entry.is_stub());
        assert_eq!(entry.id, 0);
    }
}
