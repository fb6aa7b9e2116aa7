//! Synchronous preflight for discrete agent actions.
//!
//! [`GovernanceAdapter::evaluate`] composes the nonce guard, the policy engine,
//! the ledger and the transparency events into one allow/deny decision. Only
//! the nonce check can short-circuit; ledger and transparency are best-effort.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use agent_ledger::{AppendRequest, Ledger, sha256_hex};
use agent_policy::{PolicyDecision, PolicyEngine, PolicyRequest};
use agent_primitives::{AgentDid, GovernanceMode, LedgerEventType, RiskGrade};
use agent_sentinel::router::SENTINEL_PRINCIPAL;
use agent_telemetry::{EventBus, GovernanceEvent};
use agent_trust::TrustEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::intent::IntentRegistry;
use crate::nonce::{NonceCheck, NonceStore};

/// Kind of action submitted for preflight.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Writing or modifying a file.
    FileWrite,
    /// Sealing an intent.
    IntentSeal,
    /// Registering a new agent.
    AgentRegistration,
}

impl ActionKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileWrite => "file_write",
            Self::IntentSeal => "intent_seal",
            Self::AgentRegistration => "agent_registration",
        }
    }
}

/// A request for a governance decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceRequest {
    /// Request identifier.
    pub id: Uuid,
    /// Action under evaluation.
    pub action: ActionKind,
    /// Artifact the action touches.
    pub artifact_path: String,
    /// Proposed content, when known.
    pub content: Option<String>,
    /// Acting agent.
    pub agent_did: Option<AgentDid>,
    /// Intent the action claims to be covered by.
    pub intent_id: Option<String>,
    /// Replay-protection nonce.
    pub nonce: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl GovernanceRequest {
    /// Request without a nonce; one is resolved during evaluation.
    #[must_use]
    pub fn new(action: ActionKind, artifact_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            artifact_path: artifact_path.into(),
            content: None,
            agent_did: None,
            intent_id: None,
            nonce: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches the proposed content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attributes the action to `agent`.
    #[must_use]
    pub fn with_agent(mut self, agent: AgentDid) -> Self {
        self.agent_did = Some(agent);
        self
    }

    /// References the covering intent.
    #[must_use]
    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    /// Sets the nonce explicitly.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}

/// Outcome of a preflight evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceDecision {
    /// Request the decision answers.
    pub request_id: Uuid,
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Assigned grade; forced to L3 when the nonce check fails.
    pub risk_grade: RiskGrade,
    /// Conditions attached to an allowed action.
    pub conditions: Vec<String>,
    /// Why the action was denied or allowed.
    pub reason: Option<String>,
    /// Ledger row recording the decision, when the ledger accepted it.
    pub ledger_entry_id: Option<i64>,
    /// Nonce consumed by the evaluation.
    pub nonce: String,
}

/// Single preflight entry point.
pub struct GovernanceAdapter {
    policy: Arc<PolicyEngine>,
    ledger: Arc<Ledger>,
    events: Arc<dyn EventBus>,
    nonces: Arc<NonceStore>,
    intents: Arc<IntentRegistry>,
    trust: Option<Arc<TrustEngine>>,
    workspace_root: PathBuf,
    mode: RwLock<GovernanceMode>,
}

impl GovernanceAdapter {
    /// Adapter in [`GovernanceMode::Enforce`].
    #[must_use]
    pub fn new(
        policy: Arc<PolicyEngine>,
        ledger: Arc<Ledger>,
        events: Arc<dyn EventBus>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            policy,
            ledger,
            events,
            nonces: Arc::new(NonceStore::default()),
            intents: Arc::new(IntentRegistry::new()),
            trust: None,
            workspace_root: workspace_root.into(),
            mode: RwLock::new(GovernanceMode::Enforce),
        }
    }

    /// Shares `nonces` with the adapter.
    #[must_use]
    pub fn with_nonce_store(mut self, nonces: Arc<NonceStore>) -> Self {
        self.nonces = nonces;
        self
    }

    /// Shares `intents` with the adapter.
    #[must_use]
    pub fn with_intents(mut self, intents: Arc<IntentRegistry>) -> Self {
        self.intents = intents;
        self
    }

    /// Snapshots agent trust into ledger entries.
    #[must_use]
    pub fn with_trust_engine(mut self, trust: Arc<TrustEngine>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Sets the initial governance mode.
    #[must_use]
    pub fn with_mode(self, mode: GovernanceMode) -> Self {
        self.set_governance_mode(mode);
        self
    }

    /// Nonce store.
    #[must_use]
    pub fn nonces(&self) -> &Arc<NonceStore> {
        &self.nonces
    }

    /// Intent registry.
    #[must_use]
    pub fn intents(&self) -> &Arc<IntentRegistry> {
        &self.intents
    }

    /// Mode in force.
    #[must_use]
    pub fn governance_mode(&self) -> GovernanceMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches the mode; used by break-glass overrides.
    pub fn set_governance_mode(&self, mode: GovernanceMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
        info!(%mode, "governance mode changed");
    }

    /// Builds a request carrying a freshly issued nonce.
    #[must_use]
    pub fn create_request(&self, action: ActionKind, artifact_path: impl Into<String>) -> GovernanceRequest {
        GovernanceRequest::new(action, artifact_path).with_nonce(self.nonces.issue())
    }

    async fn artifact_hash(&self, request: &GovernanceRequest) -> Option<String> {
        if let Some(content) = &request.content {
            return Some(sha256_hex(content.as_bytes()));
        }
        let path = self.workspace_root.join(&request.artifact_path);
        tokio::fs::read(&path).await.ok().map(|bytes| sha256_hex(&bytes))
    }

    /// Evaluates `request`. Never fails: every internal failure resolves to a
    /// denial at L3 or is logged and skipped.
    pub async fn evaluate(&self, request: &GovernanceRequest) -> GovernanceDecision {
        self.events.publish(GovernanceEvent::TransparencyStarted {
            request_id: request.id,
            action: request.action.as_str().to_owned(),
        });

        let (nonce, check) = match &request.nonce {
            Some(nonce) => (nonce.clone(), self.nonces.consume(nonce)),
            None => (self.nonces.resolve(), NonceCheck::Accepted),
        };

        let mode = self.governance_mode();
        let intent_active = request
            .intent_id
            .as_deref()
            .is_some_and(|intent| self.intents.is_active(intent));
        let mut decision = if check.is_accepted() {
            let policy_request = PolicyRequest::new(request.artifact_path.clone())
                .with_content(request.content.clone())
                .with_active_intent(intent_active);
            apply_mode(request.id, mode, &self.policy.evaluate(&policy_request))
        } else {
            warn!(request = %request.id, reason = check.reason(), "nonce rejected");
            GovernanceDecision {
                request_id: request.id,
                allowed: false,
                risk_grade: RiskGrade::L3,
                conditions: Vec::new(),
                reason: Some(check.reason().to_owned()),
                ledger_entry_id: None,
                nonce: String::new(),
            }
        };
        decision.nonce = nonce;
        let context = RecordContext {
            mode,
            intent_active,
            nonce_rejected: !check.is_accepted(),
        };
        decision.ledger_entry_id = self.record(request, &decision, context).await;

        info!(
            request = %request.id,
            action = request.action.as_str(),
            path = %request.artifact_path,
            allowed = decision.allowed,
            grade = %decision.risk_grade,
            "governance decision"
        );
        self.events.publish(GovernanceEvent::TransparencyCompleted {
            request_id: request.id,
            allowed: decision.allowed,
            risk_grade: decision.risk_grade,
        });
        decision
    }

    async fn record(
        &self,
        request: &GovernanceRequest,
        decision: &GovernanceDecision,
        context: RecordContext,
    ) -> Option<i64> {
        let event_type = if decision.allowed {
            LedgerEventType::GovernanceResumed
        } else {
            LedgerEventType::GovernancePaused
        };
        let principal = request
            .agent_did
            .as_ref()
            .map_or(SENTINEL_PRINCIPAL, AgentDid::as_str);

        let mut entry = AppendRequest::new(event_type, principal)
            .artifact_path(request.artifact_path.clone())
            .artifact_hash(self.artifact_hash(request).await)
            .risk_grade(decision.risk_grade)
            .field("requestId", request.id.to_string())
            .field("action", request.action.as_str())
            .field("nonce", decision.nonce.as_str())
            .field("conditions", json!(decision.conditions))
            .field("allowed", decision.allowed)
            .field("governanceMode", context.mode.as_str())
            .field("intentActive", context.intent_active)
            .field("policyHash", self.policy.get_policy_hash());
        if context.nonce_rejected {
            entry = entry.field("nonceRejected", true);
        }
        if let Some(reason) = &decision.reason {
            entry = entry.field("reason", reason.as_str());
        }
        if let Some(intent) = &request.intent_id {
            entry = entry.field("intentId", intent.as_str());
        }
        if let (Some(trust), Some(did)) = (&self.trust, &request.agent_did) {
            match trust.lookup(did).await {
                Ok(Some(agent)) => entry = entry.trust_at_action(agent.trust_score),
                Ok(None) => {}
                Err(err) => warn!(%did, error = %err, "trust snapshot unavailable"),
            }
        }

        match self.ledger.append_entry_async(entry).await {
            Ok(entry) if entry.is_stub() => None,
            Ok(entry) => Some(entry.id),
            Err(err) => {
                warn!(request = %request.id, error = %err, "failed to record governance decision");
                None
            }
        }
    }
}

/// What the ledger entry needs beyond the request and decision.
#[derive(Clone, Copy)]
struct RecordContext {
    mode: GovernanceMode,
    intent_active: bool,
    nonce_rejected: bool,
}

/// Folds the governance mode into a policy decision.
///
/// Observe never blocks. Assist lets denied L1 and L2 changes through with a
/// review condition but still holds escalations. Enforce applies the policy
/// as is. Overridden outcomes are kept as conditions for the audit trail.
pub(crate) fn apply_mode(
    request_id: Uuid,
    mode: GovernanceMode,
    policy: &PolicyDecision,
) -> GovernanceDecision {
    let requirement = &policy.requirement;
    let mut conditions = Vec::new();
    if policy.is_allow() && !requirement.auto_approve {
        conditions.push(format!(
            "{} verification by {}",
            requirement.method.as_str(),
            requirement.authority
        ));
    }
    for approver in policy.required_approvals() {
        conditions.push(format!("approval required from {approver}"));
    }

    let allowed = match mode {
        GovernanceMode::Enforce => policy.is_allow(),
        GovernanceMode::Assist if policy.is_deny() => {
            conditions.push("assist mode: review recommended".to_owned());
            true
        }
        GovernanceMode::Assist => policy.is_allow(),
        GovernanceMode::Observe if !policy.is_allow() => {
            let outcome = if policy.is_escalate() { "escalated" } else { "denied" };
            conditions.push(format!("observe mode: would have been {outcome}"));
            true
        }
        GovernanceMode::Observe => true,
    };

    GovernanceDecision {
        request_id,
        allowed,
        risk_grade: policy.risk_grade(),
        conditions,
        reason: Some(policy.reason.clone()),
        ledger_entry_id: None,
        nonce: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use agent_config::InMemorySecretStore;
    use agent_policy::PolicyConfig;
    use agent_telemetry::CollectingEventBus;

    use super::*;

    async fn adapter() -> (GovernanceAdapter, Arc<Ledger>, Arc<CollectingEventBus>) {
        let ledger = Arc::new(Ledger::in_memory(&InMemorySecretStore::new()).await.unwrap());
        let bus = CollectingEventBus::new();
        let adapter = GovernanceAdapter::new(
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            ledger.clone(),
            bus.clone(),
            std::env::temp_dir(),
        );
        (adapter, ledger, bus)
    }

    #[tokio::test]
    async fn low_risk_actions_are_allowed_and_recorded() {
        let (adapter, ledger, bus) = adapter().await;
        let request = adapter.create_request(ActionKind::FileWrite, "docs/notes.md");
        let decision = adapter.evaluate(&request).await;

        assert!(decision.allowed);
        assert_eq!(decision.risk_grade, RiskGrade::L1);
        let entry = ledger.get_entry_by_id(decision.ledger_entry_id.unwrap()).unwrap();
        assert_eq!(entry.event_type, LedgerEventType::GovernanceResumed);
        assert_eq!(entry.payload_str("nonce"), Some(decision.nonce.as_str()));
        assert!(entry.payload_str("policyHash").is_some());

        let names: Vec<_> = bus.drain().iter().map(GovernanceEvent::name).collect();
        assert_eq!(names, ["transparency_started", "transparency_completed"]);
    }

    #[tokio::test]
    async fn reused_and_unknown_nonces_fail_closed() {
        let (adapter, ledger, _bus) = adapter().await;
        let request = adapter.create_request(ActionKind::FileWrite, "docs/notes.md");
        assert!(adapter.evaluate(&request).await.allowed);

        let replayed = adapter.evaluate(&request).await;
        assert!(!replayed.allowed);
        assert_eq!(replayed.risk_grade, RiskGrade::L3);
        assert_eq!(replayed.reason.as_deref(), Some("nonce reuse detected"));

        let forged = GovernanceRequest::new(ActionKind::FileWrite, "docs/notes.md").with_nonce("00");
        let decision = adapter.evaluate(&forged).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("unknown nonce"));

        let paused = ledger
            .get_entries_by_type(LedgerEventType::GovernancePaused, 10)
            .unwrap();
        assert_eq!(paused.len(), 2);
        assert!(paused.iter().all(|entry| entry.payload_bool("nonceRejected") == Some(true)));

        let first = ledger
            .get_entries_by_type(LedgerEventType::GovernanceResumed, 10)
            .unwrap();
        assert_eq!(first[0].payload_bool("nonceRejected"), None);
        assert_eq!(first[0].payload_bool("intentActive"), Some(false));
    }

    #[tokio::test]
    async fn intents_unlock_l2_but_l3_escalates() {
        let (adapter, _ledger, _bus) = adapter().await;
        let denied = adapter
            .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/util/helper.ts"))
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.risk_grade, RiskGrade::L2);

        adapter.intents().activate("intent-42");
        let covered = adapter
            .evaluate(
                &adapter
                    .create_request(ActionKind::FileWrite, "src/util/helper.ts")
                    .with_intent("intent-42"),
            )
            .await;
        assert!(covered.allowed);
        assert_eq!(covered.conditions, ["full_heuristic verification by sentinel"]);

        let escalated = adapter
            .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
            .await;
        assert!(!escalated.allowed);
        assert_eq!(escalated.risk_grade, RiskGrade::L3);
        assert_eq!(escalated.conditions, ["approval required from overseer"]);
    }

    #[tokio::test]
    async fn observe_mode_records_but_does_not_block() {
        let (adapter, ledger, _bus) = adapter().await;
        let adapter = adapter.with_mode(GovernanceMode::Observe);
        let decision = adapter
            .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.risk_grade, RiskGrade::L3);
        assert_eq!(
            decision.conditions,
            ["approval required from overseer", "observe mode: would have been escalated"]
        );
        let entry = ledger.get_entry_by_id(decision.ledger_entry_id.unwrap()).unwrap();
        assert_eq!(entry.payload_str("governanceMode"), Some("observe"));
    }

    #[tokio::test]
    async fn assist_mode_holds_escalations_only() {
        let (adapter, _ledger, _bus) = adapter().await;
        adapter.set_governance_mode(GovernanceMode::Assist);
        let l2 = adapter
            .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/util/helper.ts"))
            .await;
        assert!(l2.allowed);
        assert_eq!(l2.conditions, ["assist mode: review recommended"]);
        let l3 = adapter
            .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
            .await;
        assert!(!l3.allowed);
    }

    #[tokio::test]
    async fn ledger_outage_does_not_block_decisions() {
        let adapter = GovernanceAdapter::new(
            Arc::new(PolicyEngine::default()),
            Arc::new(Ledger::unavailable("disk full")),
            CollectingEventBus::new(),
            std::env::temp_dir(),
        );
        let decision = adapter
            .evaluate(&adapter.create_request(ActionKind::IntentSeal, "README.md"))
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.ledger_entry_id, None);
    }
}
