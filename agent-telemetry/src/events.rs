//! Typed notifications emitted by the governance core.
//!
//! Publishing is fire-and-forget: the core never waits on subscribers and a bus
//! without listeners silently drops events.

use std::sync::{Arc, Mutex, PoisonError};

use agent_primitives::{AgentDid, GovernanceMode, RiskGrade, SentinelVerdict, TrustStage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Closed set of events observable by hosts.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    /// The arbiter produced a verdict.
    VerdictPublished(SentinelVerdict),
    /// An escalated verdict could not be queued for human approval.
    EscalationFailed {
        /// Verdict that failed to queue.
        verdict_id: Uuid,
        /// Artifact the verdict concerned.
        artifact_path: String,
        /// Why queueing failed.
        reason: String,
    },
    /// An agent's trust changed.
    TrustUpdated {
        /// Affected agent.
        did: AgentDid,
        /// Score before the update.
        previous_score: f64,
        /// Score after the update.
        score: f64,
        /// Stage after the update.
        stage: TrustStage,
    },
    /// An agent entered quarantine.
    AgentQuarantined {
        /// Affected agent.
        did: AgentDid,
        /// Operator supplied reason.
        reason: String,
    },
    /// An agent left quarantine.
    AgentReleased {
        /// Affected agent.
        did: AgentDid,
    },
    /// An L3 approval request was queued.
    L3Queued {
        /// Request identifier.
        request_id: Uuid,
        /// Artifact awaiting approval.
        artifact_path: String,
        /// Grade of the artifact.
        risk_grade: RiskGrade,
        /// Deadline for a human decision.
        sla_deadline: DateTime<Utc>,
    },
    /// A human decided an L3 request.
    L3Decided {
        /// Request identifier.
        request_id: Uuid,
        /// Whether the change was approved.
        approved: bool,
        /// Conditions attached to an approval.
        conditions: Vec<String>,
    },
    /// A break-glass override became active.
    BreakGlassActivated {
        /// Override identifier.
        override_id: Uuid,
        /// Automatic expiry.
        expires_at: DateTime<Utc>,
        /// Mode in force while the override lasts.
        override_mode: GovernanceMode,
    },
    /// A break-glass override was revoked by a person.
    BreakGlassRevoked {
        /// Override identifier.
        override_id: Uuid,
        /// Who revoked it.
        revoked_by: String,
    },
    /// A break-glass override reached its expiry.
    BreakGlassExpired {
        /// Override identifier.
        override_id: Uuid,
    },
    /// Replaying a ledger entry disagreed with history or raised warnings.
    DriftDetected {
        /// Replayed ledger entry.
        entry_id: i64,
        /// Reason the decision diverged, when it did.
        divergence: Option<String>,
        /// Policy or artifact drift warnings.
        warnings: Vec<String>,
    },
    /// A governance evaluation started.
    TransparencyStarted {
        /// Request identifier.
        request_id: Uuid,
        /// Action under evaluation.
        action: String,
    },
    /// A governance evaluation finished.
    TransparencyCompleted {
        /// Request identifier.
        request_id: Uuid,
        /// Outcome.
        allowed: bool,
        /// Grade assigned.
        risk_grade: RiskGrade,
    },
}

impl GovernanceEvent {
    /// Short machine-readable event name, matching the serde tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::VerdictPublished(_) => "verdict_published",
            Self::EscalationFailed { .. } => "escalation_failed",
            Self::TrustUpdated { .. } => "trust_updated",
            Self::AgentQuarantined { .. } => "agent_quarantined",
            Self::AgentReleased { .. } => "agent_released",
            Self::L3Queued { .. } => "l3_queued",
            Self::L3Decided { .. } => "l3_decided",
            Self::BreakGlassActivated { .. } => "break_glass_activated",
            Self::BreakGlassRevoked { .. } => "break_glass_revoked",
            Self::BreakGlassExpired { .. } => "break_glass_expired",
            Self::DriftDetected { .. } => "drift_detected",
            Self::TransparencyStarted { .. } => "transparency_started",
            Self::TransparencyCompleted { .. } => "transparency_completed",
        }
    }
}

/// Fire-and-forget publisher used by every core component.
pub trait EventBus: Send + Sync {
    /// Publishes an event to all current subscribers.
    fn publish(&self, event: GovernanceEvent);
}

/// Bus that only logs events through `tracing`.
#[derive(Default)]
pub struct TracingEventBus;

impl EventBus for TracingEventBus {
    fn publish(&self, event: GovernanceEvent) {
        tracing::debug!(event = event.name(), "governance event");
    }
}

/// Multi-subscriber bus backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than applying
/// back-pressure to the core.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<GovernanceEvent>,
}

impl BroadcastEventBus {
    /// Creates a bus retaining up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: GovernanceEvent) {
        tracing::debug!(event = event.name(), "broadcasting governance event");
        // No receivers is not an error for a notification bus.
        let _ = self.sender.send(event);
    }
}

/// Bus used during testing to capture events.
#[derive(Default)]
pub struct CollectingEventBus {
    events: Mutex<Vec<GovernanceEvent>>,
}

impl CollectingEventBus {
    /// Creates a new collecting bus.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns and clears the collected events.
    #[must_use]
    pub fn drain(&self) -> Vec<GovernanceEvent> {
        let mut lock = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        lock.drain(..).collect()
    }

    /// Number of collected events not yet drained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no events are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventBus for CollectingEventBus {
    fn publish(&self, event: GovernanceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_primitives::Persona;

    #[test]
    fn collecting_bus_drains_in_order() {
        let bus = CollectingEventBus::new();
        let did = AgentDid::derive(Persona::Scrivener, "pk");
        bus.publish(GovernanceEvent::AgentQuarantined {
            did: did.clone(),
            reason: "manual".into(),
        });
        bus.publish(GovernanceEvent::AgentReleased { did });

        assert_eq!(bus.len(), 2);
        let events = bus.drain();
        assert_eq!(events[0].name(), "agent_quarantined");
        assert_eq!(events[1].name(), "agent_released");
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn broadcast_bus_delivers_to_subscribers() {
        let bus = BroadcastEventBus::default();
        let mut rx = bus.subscribe();
        let override_id = Uuid::new_v4();
        bus.publish(GovernanceEvent::BreakGlassExpired { override_id });

        let received = rx.recv().await.unwrap();
        assert_eq!(received, GovernanceEvent::BreakGlassExpired { override_id });
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = BroadcastEventBus::new(4);
        bus.publish(GovernanceEvent::TransparencyStarted {
            request_id: Uuid::new_v4(),
            action: "file_write".into(),
        });
    }

    #[test]
    fn serialized_tag_matches_name() {
        let event = GovernanceEvent::L3Decided {
            request_id: Uuid::nil(),
            approved: true,
            conditions: vec!["pair review".into()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }
}
