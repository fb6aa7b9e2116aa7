//! Trust engine: registration, scoring, quarantine and revocation.

use std::sync::Arc;

use agent_ledger::{AppendRequest, Ledger};
use agent_primitives::{AgentDid, LedgerEventType, Persona, TrustStage};
use agent_telemetry::{EventBus, GovernanceEvent};
use chrono::Utc;
use tracing::{info, warn};

use crate::model::{AgentIdentity, TrustOutcome, TrustScore};
use crate::repository::{AgentRepository, InMemoryAgentRepository, SqliteAgentRepository};
use crate::retry::{RetryError, RetryPolicy};
use crate::{TrustError, TrustResult};

/// Outcome of one read-modify-write cycle.
struct Transition {
    before: AgentIdentity,
    after: AgentIdentity,
    changed: bool,
}

/// Maintains agent reputation and mirrors every change to the ledger.
pub struct TrustEngine {
    repository: Arc<dyn AgentRepository>,
    ledger: Arc<Ledger>,
    events: Arc<dyn EventBus>,
    retry: RetryPolicy,
}

impl TrustEngine {
    /// Creates an engine over an explicit repository.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AgentRepository>,
        ledger: Arc<Ledger>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            repository,
            ledger,
            events,
            retry: RetryPolicy::default(),
        }
    }

    /// Persists trust in the ledger database, or in memory when the ledger
    /// runs in stub mode.
    #[must_use]
    pub fn for_ledger(ledger: Arc<Ledger>, events: Arc<dyn EventBus>) -> Self {
        let repository: Arc<dyn AgentRepository> = if let Some(store) = ledger.store() {
            Arc::new(SqliteAgentRepository::new(store))
        } else {
            warn!("ledger unavailable; agent trust will not survive restarts");
            Arc::new(InMemoryAgentRepository::new())
        };
        Self::new(repository, ledger, events)
    }

    /// Overrides the conflict retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Registers an agent for `persona` and `public_key`, returning the
    /// existing identity when the derived DID is already known.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn register_agent(
        &self,
        persona: Persona,
        public_key: &str,
    ) -> TrustResult<AgentIdentity> {
        let did = AgentDid::derive(persona, public_key);
        self.register(did, persona, public_key).await
    }

    /// Returns the agent, auto-registering unknown DIDs at the default score
    /// with the persona embedded in the DID.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn ensure_agent(&self, did: &AgentDid) -> TrustResult<AgentIdentity> {
        if let Some(agent) = self.repository.fetch(did).await? {
            return Ok(agent);
        }
        let persona = did.persona().unwrap_or_else(|| {
            warn!(%did, "no persona embedded in DID; registering as scrivener");
            Persona::Scrivener
        });
        self.register(did.clone(), persona, "").await
    }

    async fn register(
        &self,
        did: AgentDid,
        persona: Persona,
        public_key: &str,
    ) -> TrustResult<AgentIdentity> {
        let agent = AgentIdentity::new(did, persona, public_key, Utc::now());
        if !self.repository.insert(&agent).await? {
            return self
                .repository
                .fetch(&agent.did)
                .await?
                .ok_or_else(|| TrustError::NotFound(agent.did.clone()));
        }

        info!(did = %agent.did, %persona, "agent registered");
        self.record(
            AppendRequest::new(LedgerEventType::AgentRegistered, agent.did.as_str())
                .trust_at_action(agent.trust_score)
                .field("persona", persona.as_str())
                .field("trustStage", agent.trust_stage.as_str()),
        )
        .await;
        Ok(agent)
    }

    /// Looks an agent up without registering it.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn lookup(&self, did: &AgentDid) -> TrustResult<Option<AgentIdentity>> {
        self.repository.fetch(did).await
    }

    /// Lists every known agent.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn get_all_agents(&self) -> TrustResult<Vec<AgentIdentity>> {
        self.repository.list().await
    }

    /// Returns the agent's standing, auto-registering unknown agents.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn get_trust_score(&self, did: &AgentDid) -> TrustResult<TrustScore> {
        Ok(self.ensure_agent(did).await?.score(Utc::now()))
    }

    /// Applies a verification outcome to the agent's score.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::Revoked`] for revoked agents and
    /// [`TrustError::RetriesExhausted`] when concurrent writers keep winning.
    pub async fn update_trust(
        &self,
        did: &AgentDid,
        outcome: TrustOutcome,
    ) -> TrustResult<TrustScore> {
        let transition = self
            .modify(did, |agent| {
                if agent.is_revoked() {
                    return Err(TrustError::Revoked(agent.did.clone()));
                }
                agent.apply(outcome, Utc::now());
                Ok(true)
            })
            .await?;
        let Transition { before, after, .. } = transition;

        info!(
            did = %did,
            %outcome,
            previous = before.trust_score,
            score = after.trust_score,
            stage = %after.trust_stage,
            "trust updated"
        );
        self.record(
            AppendRequest::new(LedgerEventType::TrustUpdate, did.as_str())
                .trust_at_action(before.trust_score)
                .field("outcome", outcome.as_str())
                .field("previousScore", before.trust_score)
                .field("newScore", after.trust_score)
                .field("previousStage", before.trust_stage.as_str())
                .field("newStage", after.trust_stage.as_str())
                .field("verificationCount", after.verification_count),
        )
        .await;
        self.events.publish(GovernanceEvent::TrustUpdated {
            did: did.clone(),
            previous_score: before.trust_score,
            score: after.trust_score,
            stage: after.trust_stage,
        });
        Ok(after.score(Utc::now()))
    }

    /// Isolates an agent. Already quarantined agents are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::RetriesExhausted`] when concurrent writers keep
    /// winning.
    pub async fn quarantine_agent(&self, did: &AgentDid, reason: &str) -> TrustResult<AgentIdentity> {
        let transition = self
            .modify(did, |agent| {
                if agent.is_quarantined {
                    return Ok(false);
                }
                agent.is_quarantined = true;
                agent.updated_at = Utc::now();
                Ok(true)
            })
            .await?;

        if transition.changed {
            warn!(%did, reason, "agent quarantined");
            self.record(
                AppendRequest::new(LedgerEventType::QuarantineStart, did.as_str())
                    .trust_at_action(transition.after.trust_score)
                    .field("reason", reason),
            )
            .await;
            self.events.publish(GovernanceEvent::AgentQuarantined {
                did: did.clone(),
                reason: reason.to_owned(),
            });
        }
        Ok(transition.after)
    }

    /// Lifts quarantine.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::Revoked`] for revoked agents and
    /// [`TrustError::RetriesExhausted`] when concurrent writers keep winning.
    pub async fn release_from_quarantine(&self, did: &AgentDid) -> TrustResult<AgentIdentity> {
        let transition = self
            .modify(did, |agent| {
                if agent.is_revoked() {
                    return Err(TrustError::Revoked(agent.did.clone()));
                }
                if !agent.is_quarantined {
                    return Ok(false);
                }
                agent.is_quarantined = false;
                agent.updated_at = Utc::now();
                Ok(true)
            })
            .await?;

        if transition.changed {
            info!(%did, "agent released from quarantine");
            self.record(
                AppendRequest::new(LedgerEventType::QuarantineEnd, did.as_str())
                    .trust_at_action(transition.after.trust_score),
            )
            .await;
            self.events
                .publish(GovernanceEvent::AgentReleased { did: did.clone() });
        }
        Ok(transition.after)
    }

    /// Permanently revokes an agent: trust is pinned to zero and quarantine can
    /// no longer be lifted.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::RetriesExhausted`] when concurrent writers keep
    /// winning.
    pub async fn revoke_agent(&self, did: &AgentDid, reason: &str) -> TrustResult<AgentIdentity> {
        let transition = self
            .modify(did, |agent| {
                if agent.is_revoked() {
                    return Ok(false);
                }
                let now = Utc::now();
                agent.trust_score = 0.0;
                agent.trust_stage = TrustStage::from_score(0.0);
                agent.is_quarantined = true;
                agent.revoked_at = Some(now);
                agent.updated_at = now;
                Ok(true)
            })
            .await?;

        if transition.changed {
            warn!(%did, reason, "agent revoked");
            self.record(
                AppendRequest::new(LedgerEventType::AgentRevoked, did.as_str())
                    .trust_at_action(transition.before.trust_score)
                    .field("reason", reason),
            )
            .await;
            if !transition.before.is_quarantined {
                self.events.publish(GovernanceEvent::AgentQuarantined {
                    did: did.clone(),
                    reason: reason.to_owned(),
                });
            }
        }
        Ok(transition.after)
    }

    async fn modify<F>(&self, did: &AgentDid, change: F) -> TrustResult<Transition>
    where
        F: Fn(&mut AgentIdentity) -> TrustResult<bool>,
    {
        let change = &change;
        let result = self
            .retry
            .run(|| self.attempt(did, change), TrustError::is_conflict)
            .await;

        result.map_err(|err| match err {
            RetryError::Exhausted { attempts, .. } => {
                warn!(%did, attempts, "trust write abandoned after repeated conflicts");
                TrustError::RetriesExhausted {
                    did: did.clone(),
                    attempts,
                }
            }
            RetryError::Fatal(err) => err,
        })
    }

    async fn attempt<F>(&self, did: &AgentDid, change: &F) -> TrustResult<Transition>
    where
        F: Fn(&mut AgentIdentity) -> TrustResult<bool>,
    {
        let before = self.ensure_agent(did).await?;
        let mut after = before.clone();
        if !change(&mut after)? {
            return Ok(Transition {
                before,
                after,
                changed: false,
            });
        }
        after.version = self.repository.update(&after).await?;
        Ok(Transition {
            before,
            after,
            changed: true,
        })
    }

    async fn record(&self, request: AppendRequest) {
        let event_type = request.event_type();
        if let Err(err) = self.ledger.append_entry_async(request).await {
            warn!(%event_type, error = %err, "failed to mirror trust change to ledger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use agent_config::InMemorySecretStore;
    use agent_telemetry::CollectingEventBus;
    use async_trait::async_trait;

    async fn engine() -> (TrustEngine, Arc<Ledger>, Arc<CollectingEventBus>) {
        let ledger = Arc::new(Ledger::in_memory(&InMemorySecretStore::new()).await.unwrap());
        let events = CollectingEventBus::new();
        let engine = TrustEngine::for_ledger(ledger.clone(), events.clone());
        (engine, ledger, events)
    }

    #[tokio::test]
    async fn unknown_agents_auto_register_from_did_persona() {
        let (engine, ledger, _) = engine().await;
        let did = AgentDid::derive(Persona::Sentinel, "pk-s");

        let score = engine.get_trust_score(&did).await.unwrap();
        assert!((score.score - 0.35).abs() < f64::EPSILON);
        assert!(score.in_probation);

        let agent = engine.lookup(&did).await.unwrap().unwrap();
        assert_eq!(agent.persona, Persona::Sentinel);
        assert_eq!(
            ledger
                .get_entries_by_type(LedgerEventType::AgentRegistered, 10)
                .unwrap()
                .len(),
            1
        );

        let external = AgentDid::parse("did:web:example.com").unwrap();
        let agent = engine.ensure_agent(&external).await.unwrap();
        assert_eq!(agent.persona, Persona::Scrivener);
    }

    #[tokio::test]
    async fn updates_are_mirrored_to_ledger_and_bus() {
        let (engine, ledger, events) = engine().await;
        let agent = engine
            .register_agent(Persona::Scrivener, "pk-1")
            .await
            .unwrap();

        let score = engine
            .update_trust(&agent.did, TrustOutcome::Success)
            .await
            .unwrap();
        assert!((score.score - 0.4).abs() < 1e-9);
        assert_eq!(score.verification_count, 1);

        let entries = ledger
            .get_entries_by_type(LedgerEventType::TrustUpdate, 10)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload_str("outcome"), Some("success"));
        assert!(ledger.verify_chain());

        let published = events.drain();
        assert!(matches!(
            published.last(),
            Some(GovernanceEvent::TrustUpdated { .. })
        ));
    }

    #[tokio::test]
    async fn quarantine_cycle_is_recorded_once() {
        let (engine, ledger, _) = engine().await;
        let agent = engine
            .register_agent(Persona::Scrivener, "pk-q")
            .await
            .unwrap();

        engine.quarantine_agent(&agent.did, "suspicious").await.unwrap();
        engine.quarantine_agent(&agent.did, "again").await.unwrap();
        let score = engine.get_trust_score(&agent.did).await.unwrap();
        assert!(score.is_quarantined);
        assert!((score.influence_weight - 0.1).abs() < f64::EPSILON);

        engine.release_from_quarantine(&agent.did).await.unwrap();
        assert_eq!(
            ledger
                .get_entries_by_type(LedgerEventType::QuarantineStart, 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            ledger
                .get_entries_by_type(LedgerEventType::QuarantineEnd, 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn revoked_agents_cannot_recover() {
        let (engine, ledger, _) = engine().await;
        let agent = engine
            .register_agent(Persona::Judge, "pk-r")
            .await
            .unwrap();

        let revoked = engine.revoke_agent(&agent.did, "key leaked").await.unwrap();
        assert!(revoked.is_revoked());
        assert!(revoked.trust_score.abs() < f64::EPSILON);

        assert!(matches!(
            engine.release_from_quarantine(&agent.did).await,
            Err(TrustError::Revoked(_))
        ));
        assert!(matches!(
            engine.update_trust(&agent.did, TrustOutcome::Success).await,
            Err(TrustError::Revoked(_))
        ));
        assert_eq!(
            ledger
                .get_entries_by_type(LedgerEventType::AgentRevoked, 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let (engine, _, _) = engine().await;
        let engine = Arc::new(engine);
        let agent = engine
            .register_agent(Persona::Scrivener, "pk-c")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            engine.update_trust(&agent.did, TrustOutcome::Success),
            engine.update_trust(&agent.did, TrustOutcome::Success),
        );
        a.unwrap();
        b.unwrap();

        let stored = engine.lookup(&agent.did).await.unwrap().unwrap();
        assert!((stored.trust_score - 0.45).abs() < 1e-9);
        assert_eq!(stored.verification_count, 2);
    }

    /// Repository that lets a simulated rival writer win the first `rival_wins`
    /// updates.
    struct ContendedRepository {
        inner: InMemoryAgentRepository,
        rival_wins: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl AgentRepository for ContendedRepository {
        async fn fetch(&self, did: &AgentDid) -> TrustResult<Option<AgentIdentity>> {
            self.inner.fetch(did).await
        }

        async fn insert(&self, agent: &AgentIdentity) -> TrustResult<bool> {
            self.inner.insert(agent).await
        }

        async fn update(&self, agent: &AgentIdentity) -> TrustResult<i64> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.rival_wins {
                let mut rival = self.inner.fetch(&agent.did).await?.unwrap();
                rival.apply(TrustOutcome::Failure, Utc::now());
                self.inner.update(&rival).await?;
            }
            self.inner.update(agent).await
        }

        async fn list(&self) -> TrustResult<Vec<AgentIdentity>> {
            self.inner.list().await
        }
    }

    async fn contended_engine(rival_wins: u32) -> (TrustEngine, Arc<ContendedRepository>) {
        let repository = Arc::new(ContendedRepository {
            inner: InMemoryAgentRepository::new(),
            rival_wins,
            attempts: AtomicU32::new(0),
        });
        let ledger = Arc::new(Ledger::unavailable("test"));
        let engine = TrustEngine::new(repository.clone(), ledger, CollectingEventBus::new());
        (engine, repository)
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_writer_forces_a_retry_on_fresh_state() {
        let (engine, repository) = contended_engine(1).await;
        let did = AgentDid::derive(Persona::Scrivener, "pk-x");
        engine.ensure_agent(&did).await.unwrap();

        let mut agent = engine.lookup(&did).await.unwrap().unwrap();
        agent.created_at -= chrono::Duration::days(60);
        agent.trust_score = 0.6;
        agent.version = repository.inner.update(&agent).await.unwrap();

        let score = engine.update_trust(&did, TrustOutcome::Success).await.unwrap();
        // Rival failure (0.6 -> 0.5) then our success on top of it.
        assert!((score.score - 0.55).abs() < 1e-9);
        assert_eq!(repository.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_conflicts_exhaust_retries() {
        let (engine, repository) = contended_engine(u32::MAX).await;
        let did = AgentDid::derive(Persona::Scrivener, "pk-y");
        engine.ensure_agent(&did).await.unwrap();

        let err = engine
            .update_trust(&did, TrustOutcome::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(repository.attempts.load(Ordering::SeqCst), 4);
    }
}
