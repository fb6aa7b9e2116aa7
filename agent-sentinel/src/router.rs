//! Fans verdicts out to the event bus, the ledger, the approval queue and the
//! trust engine.

use std::sync::Arc;

use agent_ledger::{AppendRequest, Ledger};
use agent_primitives::{LedgerEventType, SentinelVerdict, VerdictDecision};
use agent_telemetry::{EventBus, GovernanceEvent};
use agent_trust::TrustEngine;
use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EscalationError;

/// Principal recorded for verdicts without an attributed agent.
pub const SENTINEL_PRINCIPAL: &str = "sentinel";

/// Destination for verdicts that need a human decision.
#[async_trait]
pub trait EscalationQueue: Send + Sync {
    /// Queues `verdict` for approval and returns the request id.
    ///
    /// # Errors
    ///
    /// Returns [`EscalationError`] when the request could not be persisted.
    async fn enqueue(&self, verdict: &SentinelVerdict) -> Result<Uuid, EscalationError>;
}

/// What happened to an escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationStatus {
    /// The verdict did not ask for escalation.
    NotRequired,
    /// Queued under the given request id.
    Queued(Uuid),
    /// Queueing failed; an [`GovernanceEvent::EscalationFailed`] was published.
    Failed(String),
}

/// Result of routing one verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Ledger row written for the verdict, when the ledger accepted it.
    pub ledger_entry_id: Option<i64>,
    /// Escalation status.
    pub escalation: EscalationStatus,
    /// Whether the authoring agent was quarantined.
    pub quarantined: bool,
}

/// Routes verdicts. Only the bus publication is guaranteed; every other sink
/// is best-effort and failures are logged.
pub struct VerdictRouter {
    events: Arc<dyn EventBus>,
    ledger: Arc<Ledger>,
    escalation: Option<Arc<dyn EscalationQueue>>,
    trust: Option<Arc<TrustEngine>>,
}

impl VerdictRouter {
    /// Router publishing to `events` and recording to `ledger`.
    #[must_use]
    pub fn new(events: Arc<dyn EventBus>, ledger: Arc<Ledger>) -> Self {
        Self {
            events,
            ledger,
            escalation: None,
            trust: None,
        }
    }

    /// Sends escalations to `queue`.
    #[must_use]
    pub fn with_escalation_queue(mut self, queue: Arc<dyn EscalationQueue>) -> Self {
        self.escalation = Some(queue);
        self
    }

    /// Quarantines agents through `trust`.
    #[must_use]
    pub fn with_trust_engine(mut self, trust: Arc<TrustEngine>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Routes `verdict`; `artifact_hash` is the SHA-256 of the evaluated content.
    pub async fn route(&self, verdict: &SentinelVerdict, artifact_hash: Option<String>) -> RouteOutcome {
        self.events
            .publish(GovernanceEvent::VerdictPublished(verdict.clone()));

        let principal = verdict
            .agent_did()
            .map_or(SENTINEL_PRINCIPAL, |did| did.as_str());
        let request = AppendRequest::new(LedgerEventType::EvaluationRouted, principal)
            .artifact_path(verdict.artifact_path())
            .artifact_hash(artifact_hash)
            .risk_grade(verdict.risk_grade())
            .field("verdictId", verdict.id().to_string())
            .field("decision", verdict.decision().as_str())
            .field("confidence", verdict.confidence())
            .field("matchedPatterns", json!(verdict.matched_patterns()))
            .field("summary", verdict.summary())
            .field("llmEvaluated", verdict.llm_evaluated());
        let ledger_entry_id = match self.ledger.append_entry_async(request).await {
            Ok(entry) if entry.is_stub() => None,
            Ok(entry) => Some(entry.id),
            Err(err) => {
                warn!(verdict = %verdict.id(), error = %err, "failed to record verdict");
                None
            }
        };

        let escalation = if verdict.decision() == VerdictDecision::Escalate {
            self.escalate(verdict).await
        } else {
            EscalationStatus::NotRequired
        };

        let quarantined = verdict.decision() == VerdictDecision::Quarantine && self.quarantine(verdict).await;

        info!(
            verdict = %verdict.id(),
            decision = %verdict.decision(),
            ledger_entry_id,
            ?escalation,
            "verdict routed"
        );
        RouteOutcome {
            ledger_entry_id,
            escalation,
            quarantined,
        }
    }

    async fn escalate(&self, verdict: &SentinelVerdict) -> EscalationStatus {
        let result = match &self.escalation {
            Some(queue) => queue.enqueue(verdict).await,
            None => Err(EscalationError("no approval queue configured".to_owned())),
        };
        match result {
            Ok(request_id) => EscalationStatus::Queued(request_id),
            Err(err) => {
                error!(verdict = %verdict.id(), error = %err, "escalation could not be queued");
                self.events.publish(GovernanceEvent::EscalationFailed {
                    verdict_id: verdict.id(),
                    artifact_path: verdict.artifact_path().to_owned(),
                    reason: err.0.clone(),
                });
                EscalationStatus::Failed(err.0)
            }
        }
    }

    async fn quarantine(&self, verdict: &SentinelVerdict) -> bool {
        let (Some(trust), Some(did)) = (&self.trust, verdict.agent_did()) else {
            return false;
        };
        match trust.quarantine_agent(did, verdict.summary()).await {
            Ok(_) => true,
            Err(err) => {
                warn!(%did, error = %err, "failed to quarantine agent");
                false
            }
        }
    }
}
