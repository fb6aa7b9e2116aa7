use std::fmt;
use std::sync::Arc;

use agent_config::{GovernanceConfig, JsonFileStateStore, SecretStore, StateStore};
use agent_governance::{
    BreakGlassProtocol, GovernanceAdapter, L3ApprovalService, NonceStore, ReplayEngine,
    RetentionSweeper,
};
use agent_ledger::Ledger;
use agent_policy::PolicyEngine;
use agent_sentinel::{
    CompiledPattern, ExistenceEngine, HeuristicEngine, LlmEvaluator, PatternLoader,
    SentinelDaemon, VerdictArbiter, VerdictRouter,
};
use agent_telemetry::{EventBus, TracingEventBus};
use agent_trust::TrustEngine;
use anyhow::Context;
use tracing::{info, warn};

/// Assembles a [`Governor`] from a configuration.
///
/// Every collaborator defaults to the one the configuration describes; tests
/// and embedding hosts can substitute their own.
#[must_use]
pub struct GovernorBuilder {
    config: GovernanceConfig,
    events: Option<Arc<dyn EventBus>>,
    state: Option<Arc<dyn StateStore>>,
    ledger: Option<Arc<Ledger>>,
    patterns: Option<Vec<CompiledPattern>>,
    llm: Option<LlmEvaluator>,
}

impl GovernorBuilder {
    /// Publishes governance events to `events` instead of the tracing bus.
    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Persists the L3 queue in `state` instead of the configured file.
    pub fn state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Uses an already opened ledger.
    pub fn ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Replaces the built-in heuristic patterns.
    pub fn patterns(mut self, patterns: Vec<CompiledPattern>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Replaces the LLM evaluator derived from the configuration.
    pub fn llm(mut self, llm: LlmEvaluator) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Opens the stores and wires the components.
    ///
    /// An unusable ledger degrades to stub mode instead of failing.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the state store cannot be
    /// opened.
    pub async fn build(self, secrets: &dyn SecretStore) -> anyhow::Result<Governor> {
        let config = self.config;
        config.validate().context("invalid governance configuration")?;

        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventBus));
        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(Ledger::open(config.resolved_ledger_path(), secrets).await),
        };
        if let Some(reason) = ledger.unavailable_reason() {
            warn!(%reason, "ledger unavailable, running in stub mode");
        }
        let state: Arc<dyn StateStore> = match self.state {
            Some(state) => state,
            None => {
                let path = config.resolved_state_path();
                Arc::new(
                    JsonFileStateStore::open(&path)
                        .await
                        .with_context(|| format!("opening state store at {}", path.display()))?,
                )
            }
        };

        let policy = Arc::new(
            PolicyEngine::from_policy_dir(config.policy_dir.as_deref())
                .await
                .with_mode(config.operational_mode),
        );
        let trust = Arc::new(TrustEngine::for_ledger(ledger.clone(), events.clone()));
        let l3 = Arc::new(L3ApprovalService::new(
            state,
            ledger.clone(),
            trust.clone(),
            events.clone(),
            config.l3_sla(),
        ));

        let arbiter = Arc::new(VerdictArbiter::new(
            HeuristicEngine::new(self.patterns.unwrap_or_else(PatternLoader::builtin)),
            ExistenceEngine::new(&config.workspace_root),
            self.llm.unwrap_or_else(|| LlmEvaluator::from_settings(&config.llm)),
            policy.clone(),
            config.arbiter_mode,
        ));
        let router = Arc::new(
            VerdictRouter::new(events.clone(), ledger.clone())
                .with_escalation_queue(l3.clone())
                .with_trust_engine(trust.clone()),
        );

        let adapter = Arc::new(
            GovernanceAdapter::new(
                policy.clone(),
                ledger.clone(),
                events.clone(),
                &config.workspace_root,
            )
            .with_nonce_store(Arc::new(NonceStore::new(config.nonce_ttl())))
            .with_trust_engine(trust.clone())
            .with_mode(config.governance_mode),
        );
        let target = Arc::downgrade(&adapter);
        let break_glass = Arc::new(
            BreakGlassProtocol::new(ledger.clone(), events.clone(), config.governance_mode)
                .with_mode_callback(Arc::new(move |mode| {
                    if let Some(adapter) = target.upgrade() {
                        adapter.set_governance_mode(mode);
                    }
                })),
        );
        let replay = ReplayEngine::new(
            ledger.clone(),
            policy.clone(),
            events.clone(),
            &config.workspace_root,
        );

        info!(
            workspace = %config.workspace_root.display(),
            mode = %config.governance_mode,
            ledger = ledger.is_available(),
            "governor ready"
        );
        Ok(Governor {
            config,
            events,
            ledger,
            trust,
            policy,
            arbiter,
            router,
            l3,
            adapter,
            break_glass,
            replay,
        })
    }
}

/// Every governance component, wired over one ledger and one event bus.
pub struct Governor {
    config: GovernanceConfig,
    events: Arc<dyn EventBus>,
    ledger: Arc<Ledger>,
    trust: Arc<TrustEngine>,
    policy: Arc<PolicyEngine>,
    arbiter: Arc<VerdictArbiter>,
    router: Arc<VerdictRouter>,
    l3: Arc<L3ApprovalService>,
    adapter: Arc<GovernanceAdapter>,
    break_glass: Arc<BreakGlassProtocol>,
    replay: ReplayEngine,
}

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("workspace_root", &self.config.workspace_root)
            .field("ledger_available", &self.ledger.is_available())
            .field("governance_mode", &self.adapter.governance_mode())
            .finish_non_exhaustive()
    }
}

impl Governor {
    /// Starts assembling a governor for `config`.
    pub fn builder(config: GovernanceConfig) -> GovernorBuilder {
        GovernorBuilder {
            config,
            events: None,
            state: None,
            ledger: None,
            patterns: None,
            llm: None,
        }
    }

    /// Configuration the governor was built from.
    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Event bus shared by every component.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    /// Audit ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Trust engine.
    #[must_use]
    pub fn trust(&self) -> &Arc<TrustEngine> {
        &self.trust
    }

    /// Policy engine.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Verdict arbiter.
    #[must_use]
    pub fn arbiter(&self) -> &Arc<VerdictArbiter> {
        &self.arbiter
    }

    /// Verdict router, escalating into [`Governor::l3`].
    #[must_use]
    pub fn router(&self) -> &Arc<VerdictRouter> {
        &self.router
    }

    /// L3 approval queue.
    #[must_use]
    pub fn l3(&self) -> &Arc<L3ApprovalService> {
        &self.l3
    }

    /// Preflight adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<GovernanceAdapter> {
        &self.adapter
    }

    /// Break-glass protocol; overrides switch the adapter's mode.
    #[must_use]
    pub fn break_glass(&self) -> &Arc<BreakGlassProtocol> {
        &self.break_glass
    }

    /// Replay engine.
    #[must_use]
    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    /// A stopped sentinel daemon over the arbiter and router.
    #[must_use]
    pub fn sentinel(&self) -> SentinelDaemon {
        SentinelDaemon::new(self.arbiter.clone(), self.router.clone())
    }

    /// A stopped retention sweeper over the adapter's nonces, the break-glass
    /// history and the L3 queue.
    #[must_use]
    pub fn retention(&self) -> RetentionSweeper {
        RetentionSweeper::new(self.adapter.nonces().clone())
            .with_break_glass(self.break_glass.clone())
            .with_l3(self.l3.clone())
    }
}
