use std::path::PathBuf;
use std::sync::Arc;

use agent_governor::Governor;
use agent_governor::config::{GovernanceConfig, InMemorySecretStore, InMemoryStateStore};
use agent_governor::governance::{
    ActionKind, BreakGlassRequest, GovernanceError, L3Decision, L3State, ReplayWarning,
};
use agent_governor::ledger::{Ledger, LedgerError};
use agent_governor::primitives::{
    GovernanceMode, LedgerEventType, Persona, RiskGrade, VerdictDecision,
};
use agent_governor::sentinel::{EscalationStatus, SentinelEvent};
use agent_governor::telemetry::{CollectingEventBus, GovernanceEvent};
use uuid::Uuid;

struct Harness {
    governor: Governor,
    bus: Arc<CollectingEventBus>,
    root: PathBuf,
}

async fn harness() -> Harness {
    let root = std::env::temp_dir().join(format!("governor-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(root.join("src/auth")).await.unwrap();
    tokio::fs::create_dir_all(root.join("docs")).await.unwrap();

    let secrets = InMemorySecretStore::new();
    let bus = CollectingEventBus::new();
    let governor = Governor::builder(GovernanceConfig::for_workspace(&root))
        .events(bus.clone())
        .state_store(Arc::new(InMemoryStateStore::new()))
        .ledger(Arc::new(Ledger::in_memory(&secrets).await.unwrap()))
        .build(&secrets)
        .await
        .unwrap();
    Harness { governor, bus, root }
}

#[tokio::test]
async fn flagged_change_round_trips_through_l3_approval() {
    let h = harness().await;
    let agent = h
        .governor
        .trust()
        .register_agent(Persona::Scrivener, "pk-scrivener-1")
        .await
        .unwrap();
    tokio::fs::write(
        h.root.join("src/auth/login.ts"),
        "const password = \"hunter2hunter2\";\n",
    )
    .await
    .unwrap();

    let sentinel = h.governor.sentinel();
    let processed = sentinel
        .audit_now(&SentinelEvent::new("src/auth/login.ts").with_agent(agent.did.clone()))
        .await;
    assert_eq!(processed.verdict.decision(), VerdictDecision::Escalate);
    assert_eq!(processed.verdict.risk_grade(), RiskGrade::L3);
    let EscalationStatus::Queued(request_id) = processed.outcome.escalation else {
        panic!("escalation not queued: {:?}", processed.outcome.escalation);
    };

    let queue = h.governor.l3().get_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, request_id);
    assert_eq!(queue[0].flags, ["secret.hardcoded_credential"]);

    let decided = h
        .governor
        .l3()
        .process_l3_decision(request_id, L3Decision::Approved, vec!["rotate before release".into()])
        .await
        .unwrap();
    assert_eq!(decided.state, L3State::ApprovedWithConditions);
    assert!(h.governor.l3().get_queue().await.unwrap().is_empty());

    let score = h.governor.trust().get_trust_score(&agent.did).await.unwrap();
    assert!((score.score - 0.40).abs() < 1e-9, "score {}", score.score);

    let ledger = h.governor.ledger();
    let approvals = ledger
        .get_entries_by_type(LedgerEventType::L3Approved, 10)
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(
        approvals[0].overseer_decision.as_deref(),
        Some("APPROVED_WITH_CONDITIONS")
    );
    assert!(ledger.verify_chain());

    let names: Vec<_> = h.bus.drain().iter().map(GovernanceEvent::name).collect();
    assert!(names.contains(&"verdict_published"));
    assert!(names.contains(&"l3_queued"));
    assert!(names.contains(&"l3_decided"));
}

#[tokio::test]
async fn unknown_l3_request_is_a_typed_error() {
    let h = harness().await;
    let missing = Uuid::new_v4();
    let err = h
        .governor
        .l3()
        .process_l3_decision(missing, L3Decision::Rejected, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::L3NotFound(id) if id == missing));
}

#[tokio::test]
async fn preflight_decisions_replay_until_policy_changes() {
    let h = harness().await;
    tokio::fs::write(h.root.join("docs/guide.md"), "# Guide\n").await.unwrap();

    let adapter = h.governor.adapter();
    let decision = adapter
        .evaluate(&adapter.create_request(ActionKind::FileWrite, "docs/guide.md"))
        .await;
    assert!(decision.allowed);
    let entry_id = decision.ledger_entry_id.unwrap();

    let replayed = h.governor.replay().replay(entry_id).await.unwrap();
    assert!(replayed.matched);
    assert!(replayed.warnings.is_empty());

    h.governor
        .policy()
        .update_config(|config| config.l2_path_triggers.push("billing".to_owned()))
        .unwrap();
    let replayed = h.governor.replay().replay(entry_id).await.unwrap();
    assert!(replayed.matched);
    assert!(matches!(
        replayed.warnings.as_slice(),
        [ReplayWarning::PolicyHashMismatch { .. }]
    ));
}

#[tokio::test]
async fn denials_and_relaxed_decisions_replay_as_recorded() {
    let h = harness().await;
    tokio::fs::create_dir_all(h.root.join("src/util")).await.unwrap();
    tokio::fs::write(h.root.join("src/util/helper.ts"), "export const add = (a, b) => a + b;\n")
        .await
        .unwrap();
    let adapter = h.governor.adapter();

    let denied = adapter
        .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/util/helper.ts"))
        .await;
    assert!(!denied.allowed);
    assert_eq!(denied.risk_grade, RiskGrade::L2);
    let replayed = h.governor.replay().replay(denied.ledger_entry_id.unwrap()).await.unwrap();
    assert_eq!(replayed.recorded_event, LedgerEventType::GovernancePaused);
    assert_eq!(replayed.expected_event, LedgerEventType::GovernancePaused);
    assert!(replayed.matched, "{:?}", replayed.divergence_reason);
    assert!(replayed.warnings.is_empty());

    adapter.set_governance_mode(GovernanceMode::Observe);
    let observed = adapter
        .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
        .await;
    assert!(observed.allowed);
    let replayed = h.governor.replay().replay(observed.ledger_entry_id.unwrap()).await.unwrap();
    assert!(replayed.matched, "{:?}", replayed.divergence_reason);
    adapter.set_governance_mode(GovernanceMode::Enforce);

    let request = adapter.create_request(ActionKind::FileWrite, "docs/guide.md");
    adapter.evaluate(&request).await;
    let reused = adapter.evaluate(&request).await;
    assert_eq!(reused.reason.as_deref(), Some("nonce reuse detected"));
    let err = h
        .governor
        .replay()
        .replay(reused.ledger_entry_id.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::NotReplayable { .. }));

    let batch = h.governor.replay().replay_recent(50).await.unwrap();
    assert_eq!(batch.diverged, 0);
    assert_eq!(batch.results.len(), 3);
    assert!(h.bus.drain().iter().all(|event| event.name() != "drift_detected"));
}

#[tokio::test(start_paused = true)]
async fn break_glass_relaxes_preflight_until_revoked() {
    let h = harness().await;
    let adapter = h.governor.adapter();
    let break_glass = h.governor.break_glass();

    let err = break_glass
        .activate(BreakGlassRequest::new("urgent", "alice", 30))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Validation(_)));

    let blocked = adapter
        .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
        .await;
    assert!(!blocked.allowed);

    let record = break_glass
        .activate(BreakGlassRequest::new("production login outage", "alice", 30))
        .await
        .unwrap();
    assert_eq!(adapter.governance_mode(), GovernanceMode::Observe);
    let second = break_glass
        .activate(BreakGlassRequest::new("another emergency", "bob", 60))
        .await
        .unwrap_err();
    assert!(
        matches!(second, GovernanceError::OverrideActive { expires_at } if expires_at == record.expires_at)
    );

    let relaxed = adapter
        .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
        .await;
    assert!(relaxed.allowed);

    break_glass.revoke("alice").await.unwrap();
    assert_eq!(adapter.governance_mode(), GovernanceMode::Enforce);
    let blocked_again = adapter
        .evaluate(&adapter.create_request(ActionKind::FileWrite, "src/auth/login.ts"))
        .await;
    assert!(!blocked_again.allowed);

    let overrides = h
        .governor
        .ledger()
        .get_entries_by_type(LedgerEventType::UserOverride, 10)
        .unwrap();
    assert_eq!(overrides.len(), 2);
}

#[tokio::test]
async fn tampering_after_a_session_is_detected() {
    let h = harness().await;
    let adapter = h.governor.adapter();
    for path in ["docs/a.md", "src/util/helper.ts", "src/auth/login.ts"] {
        adapter
            .evaluate(&adapter.create_request(ActionKind::FileWrite, path))
            .await;
    }
    let ledger = h.governor.ledger();
    assert!(ledger.verify_chain());

    ledger
        .store()
        .unwrap()
        .with_connection(|conn| {
            conn.execute("UPDATE soa_ledger SET risk_grade = 'L1' WHERE id = 3", [])
                .map_err(LedgerError::from)
        })
        .unwrap();

    let report = ledger.audit_chain().unwrap();
    assert!(!report.is_intact());
    assert_eq!(report.failure.unwrap().entry_id, 3);
    assert!(!ledger.verify_chain());
}

#[tokio::test]
async fn retention_sweep_runs_against_live_components() {
    let h = harness().await;
    let report = h.governor.retention().sweep_now().await;
    assert_eq!(report.nonces_removed, 0);
    assert_eq!(report.overdue_l3, 0);
}
