//! SLA-bound queue of changes awaiting a human decision.
//!
//! The live queue is persisted as one JSON array in the host's
//! [`StateStore`], so pending requests survive restarts. Every queue and
//! decision is mirrored to the ledger.

use std::sync::Arc;
use std::time::Duration;

use agent_config::StateStore;
use agent_ledger::{AppendRequest, Ledger};
use agent_primitives::{AgentDid, LedgerEventType, RiskGrade, RoutingRisk, SentinelVerdict};
use agent_sentinel::{EscalationError, EscalationQueue};
use agent_sentinel::router::SENTINEL_PRINCIPAL;
use agent_telemetry::{EventBus, GovernanceEvent};
use agent_trust::{TrustEngine, TrustOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{GovernanceError, GovernanceResult};

/// State-store key holding the live queue.
pub const L3_QUEUE_KEY: &str = "l3.queue";
/// Overseer recorded when none is configured.
pub const LOCAL_OVERSEER: &str = "did:myth:overseer:local";

/// Lifecycle state of an approval request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum L3State {
    /// Waiting for a human.
    Queued,
    /// Approved as is.
    Approved,
    /// Approved subject to conditions.
    ApprovedWithConditions,
    /// Rejected.
    Rejected,
}

impl L3State {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Approved => "APPROVED",
            Self::ApprovedWithConditions => "APPROVED_WITH_CONDITIONS",
            Self::Rejected => "REJECTED",
        }
    }
}

/// A human's decision on a queued request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum L3Decision {
    /// Let the change proceed.
    Approved,
    /// Refuse the change.
    Rejected,
}

/// A change awaiting, or having received, human approval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L3ApprovalRequest {
    /// Request identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub state: L3State,
    /// Authoring agent, when known.
    pub agent_did: Option<AgentDid>,
    /// Artifact under review.
    pub artifact_path: String,
    /// Grade on the ledger scale.
    pub risk_grade: RiskGrade,
    /// Agent trust when the request was queued.
    pub trust_at_submission: Option<f64>,
    /// Pattern ids and other flags raised against the change.
    pub flags: Vec<String>,
    /// Short description for the reviewer.
    pub summary: String,
    /// Verdict that caused the escalation, if any.
    pub verdict_id: Option<Uuid>,
    /// When the request was queued.
    pub queued_at: DateTime<Utc>,
    /// When a decision is due.
    pub sla_deadline: DateTime<Utc>,
    /// Conditions attached to an approval.
    pub conditions: Vec<String>,
    /// When the decision was made.
    pub decided_at: Option<DateTime<Utc>>,
}

impl L3ApprovalRequest {
    /// Whether the SLA deadline has passed at `now` without a decision.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == L3State::Queued && now > self.sla_deadline
    }
}

/// Input to [`L3ApprovalService::queue_l3_approval`].
#[derive(Clone, Debug, PartialEq)]
pub struct L3Submission {
    artifact_path: String,
    risk_grade: RiskGrade,
    agent_did: Option<AgentDid>,
    flags: Vec<String>,
    summary: String,
    verdict_id: Option<Uuid>,
}

impl L3Submission {
    /// Submission for `artifact_path` at `risk_grade`.
    #[must_use]
    pub fn new(artifact_path: impl Into<String>, risk_grade: RiskGrade) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            risk_grade,
            agent_did: None,
            flags: Vec::new(),
            summary: String::new(),
            verdict_id: None,
        }
    }

    /// Submission graded on the routing scale.
    #[must_use]
    pub fn routed(artifact_path: impl Into<String>, risk: RoutingRisk) -> Self {
        Self::new(artifact_path, risk.into())
    }

    /// Submission for an escalated verdict.
    #[must_use]
    pub fn from_verdict(verdict: &SentinelVerdict) -> Self {
        Self {
            artifact_path: verdict.artifact_path().to_owned(),
            risk_grade: verdict.risk_grade(),
            agent_did: verdict.agent_did().cloned(),
            flags: verdict.matched_patterns().to_vec(),
            summary: verdict.summary().to_owned(),
            verdict_id: Some(verdict.id()),
        }
    }

    /// Attributes the change to `agent`.
    #[must_use]
    pub fn agent(mut self, agent: AgentDid) -> Self {
        self.agent_did = Some(agent);
        self
    }

    /// Sets the flags shown to the reviewer.
    #[must_use]
    pub fn flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the reviewer summary.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// Human approval queue with SLA tracking.
pub struct L3ApprovalService {
    state: Arc<dyn StateStore>,
    ledger: Arc<Ledger>,
    trust: Arc<TrustEngine>,
    events: Arc<dyn EventBus>,
    sla: Duration,
    overseer: String,
    // Serializes read-modify-write cycles on the persisted queue.
    queue_lock: Mutex<()>,
}

impl L3ApprovalService {
    /// Creates a service with the given SLA.
    #[must_use]
    pub fn new(
        state: Arc<dyn StateStore>,
        ledger: Arc<Ledger>,
        trust: Arc<TrustEngine>,
        events: Arc<dyn EventBus>,
        sla: Duration,
    ) -> Self {
        Self {
            state,
            ledger,
            trust,
            events,
            sla,
            overseer: LOCAL_OVERSEER.to_owned(),
            queue_lock: Mutex::new(()),
        }
    }

    /// Records decisions under `overseer` instead of [`LOCAL_OVERSEER`].
    #[must_use]
    pub fn with_overseer(mut self, overseer: impl Into<String>) -> Self {
        self.overseer = overseer.into();
        self
    }

    /// Configured SLA.
    #[must_use]
    pub fn sla(&self) -> Duration {
        self.sla
    }

    async fn load(&self) -> GovernanceResult<Vec<L3ApprovalRequest>> {
        match self.state.get(L3_QUEUE_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, queue: &[L3ApprovalRequest]) -> GovernanceResult<()> {
        self.state
            .set(L3_QUEUE_KEY, serde_json::to_value(queue)?)
            .await?;
        Ok(())
    }

    /// Queues a change for human approval.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue cannot be read or persisted. Ledger
    /// failures are logged and do not fail the call.
    pub async fn queue_l3_approval(
        &self,
        submission: L3Submission,
    ) -> GovernanceResult<L3ApprovalRequest> {
        let trust_at_submission = match &submission.agent_did {
            Some(did) => match self.trust.ensure_agent(did).await {
                Ok(agent) => Some(agent.trust_score),
                Err(err) => {
                    warn!(%did, error = %err, "trust snapshot unavailable");
                    None
                }
            },
            None => None,
        };

        let queued_at = Utc::now();
        let sla = chrono::Duration::from_std(self.sla).unwrap_or(chrono::Duration::MAX);
        let request = L3ApprovalRequest {
            id: Uuid::new_v4(),
            state: L3State::Queued,
            agent_did: submission.agent_did,
            artifact_path: submission.artifact_path,
            risk_grade: submission.risk_grade,
            trust_at_submission,
            flags: submission.flags,
            summary: submission.summary,
            verdict_id: submission.verdict_id,
            queued_at,
            sla_deadline: queued_at.checked_add_signed(sla).unwrap_or(DateTime::<Utc>::MAX_UTC),
            conditions: Vec::new(),
            decided_at: None,
        };

        {
            let _guard = self.queue_lock.lock().await;
            let mut queue = self.load().await?;
            queue.push(request.clone());
            self.save(&queue).await?;
        }

        let principal = request
            .agent_did
            .as_ref()
            .map_or(SENTINEL_PRINCIPAL, AgentDid::as_str);
        let mut entry = AppendRequest::new(LedgerEventType::L3Queued, principal)
            .artifact_path(request.artifact_path.clone())
            .risk_grade(request.risk_grade)
            .field("requestId", request.id.to_string())
            .field("slaDeadline", request.sla_deadline.to_rfc3339())
            .field("flags", json!(request.flags));
        if let Some(score) = trust_at_submission {
            entry = entry.trust_at_action(score);
        }
        if let Err(err) = self.ledger.append_entry_async(entry).await {
            warn!(request = %request.id, error = %err, "failed to record L3 queueing");
        }

        info!(
            request = %request.id,
            path = %request.artifact_path,
            grade = %request.risk_grade,
            sla_deadline = %request.sla_deadline,
            "L3 approval queued"
        );
        self.events.publish(GovernanceEvent::L3Queued {
            request_id: request.id,
            artifact_path: request.artifact_path.clone(),
            risk_grade: request.risk_grade,
            sla_deadline: request.sla_deadline,
        });
        Ok(request)
    }

    /// Applies a human decision and removes the request from the live queue.
    ///
    /// An approval carrying conditions is recorded as
    /// [`L3State::ApprovedWithConditions`]. The authoring agent receives a
    /// success outcome on approval and a failure outcome on rejection.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::L3NotFound`] for unknown ids, and ledger or
    /// state-store errors; the request stays queued in those cases.
    pub async fn process_l3_decision(
        &self,
        id: Uuid,
        decision: L3Decision,
        conditions: Vec<String>,
    ) -> GovernanceResult<L3ApprovalRequest> {
        let guard = self.queue_lock.lock().await;
        let mut queue = self.load().await?;
        let index = queue
            .iter()
            .position(|request| request.id == id)
            .ok_or(GovernanceError::L3NotFound(id))?;

        let mut request = queue[index].clone();
        let conditions: Vec<String> = conditions
            .into_iter()
            .map(|condition| condition.trim().to_owned())
            .filter(|condition| !condition.is_empty())
            .collect();
        request.state = match decision {
            L3Decision::Approved if conditions.is_empty() => L3State::Approved,
            L3Decision::Approved => L3State::ApprovedWithConditions,
            L3Decision::Rejected => L3State::Rejected,
        };
        request.conditions = conditions;
        let decided_at = Utc::now();
        request.decided_at = Some(decided_at);

        let (event_type, outcome) = match decision {
            L3Decision::Approved => (LedgerEventType::L3Approved, TrustOutcome::Success),
            L3Decision::Rejected => (LedgerEventType::L3Rejected, TrustOutcome::Failure),
        };
        let principal = request
            .agent_did
            .as_ref()
            .map_or(SENTINEL_PRINCIPAL, AgentDid::as_str);
        let pending = queue.remove(index);
        self.save(&queue).await?;
        let recorded = self
            .ledger
            .append_entry_async(
                AppendRequest::new(event_type, principal)
                    .artifact_path(request.artifact_path.clone())
                    .risk_grade(request.risk_grade)
                    .overseer(self.overseer.clone(), request.state.as_str())
                    .field("requestId", id.to_string())
                    .field("conditions", json!(request.conditions))
                    .field("slaMet", Value::Bool(decided_at <= request.sla_deadline)),
            )
            .await;
        if let Err(err) = recorded {
            queue.insert(index, pending);
            if let Err(restore) = self.save(&queue).await {
                error!(request = %id, error = %restore, "failed to restore L3 request after ledger failure");
            }
            return Err(err.into());
        }
        drop(guard);

        if let Some(did) = &request.agent_did {
            if let Err(err) = self.trust.update_trust(did, outcome).await {
                warn!(%did, error = %err, "trust update after L3 decision failed");
            }
        }

        info!(request = %id, state = request.state.as_str(), "L3 decision recorded");
        self.events.publish(GovernanceEvent::L3Decided {
            request_id: id,
            approved: decision == L3Decision::Approved,
            conditions: request.conditions.clone(),
        });
        Ok(request)
    }

    /// Pending requests, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted queue cannot be read.
    pub async fn get_queue(&self) -> GovernanceResult<Vec<L3ApprovalRequest>> {
        let _guard = self.queue_lock.lock().await;
        self.load().await
    }

    /// Pending requests past their SLA at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted queue cannot be read.
    pub async fn overdue(&self, now: DateTime<Utc>) -> GovernanceResult<Vec<L3ApprovalRequest>> {
        Ok(self
            .get_queue()
            .await?
            .into_iter()
            .filter(|request| request.is_overdue(now))
            .collect())
    }
}

#[async_trait]
impl EscalationQueue for L3ApprovalService {
    async fn enqueue(&self, verdict: &SentinelVerdict) -> Result<Uuid, EscalationError> {
        self.queue_l3_approval(L3Submission::from_verdict(verdict))
            .await
            .map(|request| request.id)
            .map_err(|err| EscalationError(err.to_string()))
    }
}
