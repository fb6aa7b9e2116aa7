//! Combines heuristic, existence and LLM signals into one verdict.

use std::sync::{Arc, PoisonError, RwLock};

use agent_config::GovernanceConfig;
use agent_ledger::sha256_hex;
use agent_policy::PolicyEngine;
use agent_primitives::{ArbiterMode, RiskGrade, SentinelVerdict, Severity, VerdictDecision};
use tracing::{debug, info, warn};

use crate::event::SentinelEvent;
use crate::existence::{ClaimReport, ClaimViolation, ExistenceEngine};
use crate::heuristic::{HeuristicEngine, HeuristicReport};
use crate::llm::{LlmDecision, LlmEvaluator, LlmOutcome};
use crate::patterns::CompiledPattern;

const HEURISTIC_AGREEING: f64 = 0.8;
const HEURISTIC_MIXED: f64 = 0.5;

/// Confidence of a verdict reached without the LLM.
#[must_use]
pub fn heuristic_confidence(severities: &[Severity]) -> f64 {
    if severities.windows(2).all(|pair| pair[0] == pair[1]) {
        HEURISTIC_AGREEING
    } else {
        HEURISTIC_MIXED
    }
}

/// Whether the LLM should be consulted for a report under `mode`.
#[must_use]
pub fn should_consult_llm(mode: ArbiterMode, report: &HeuristicReport) -> bool {
    match mode {
        ArbiterMode::Heuristic => false,
        ArbiterMode::LlmAssisted => true,
        ArbiterMode::Hybrid => report.has_significant_flag(),
    }
}

fn decision_for_severity(severity: Severity) -> VerdictDecision {
    match severity {
        Severity::Critical => VerdictDecision::Block,
        Severity::High => VerdictDecision::Escalate,
        Severity::Medium => VerdictDecision::Warn,
        Severity::Low => VerdictDecision::Pass,
    }
}

fn grade_for_severity(severity: Severity) -> RiskGrade {
    match severity {
        Severity::Critical | Severity::High => RiskGrade::L3,
        Severity::Medium => RiskGrade::L2,
        Severity::Low => RiskGrade::L1,
    }
}

fn violation_pattern(violation: ClaimViolation) -> &'static str {
    match violation {
        ClaimViolation::EscapesRoot => "existence.escapes_root",
        ClaimViolation::Missing => "existence.missing",
    }
}

/// A verdict together with the hash of the content it was reached on.
#[derive(Debug, Clone)]
pub struct Assessment {
    /// The verdict.
    pub verdict: SentinelVerdict,
    /// SHA-256 of the evaluated content, when content was available.
    pub artifact_hash: Option<String>,
}

/// Produces [`SentinelVerdict`]s for file events.
#[derive(Debug)]
pub struct VerdictArbiter {
    heuristics: HeuristicEngine,
    existence: ExistenceEngine,
    llm: LlmEvaluator,
    policy: Arc<PolicyEngine>,
    mode: RwLock<ArbiterMode>,
}

impl VerdictArbiter {
    /// Assembles an arbiter from its engines.
    #[must_use]
    pub fn new(
        heuristics: HeuristicEngine,
        existence: ExistenceEngine,
        llm: LlmEvaluator,
        policy: Arc<PolicyEngine>,
        mode: ArbiterMode,
    ) -> Self {
        Self {
            heuristics,
            existence,
            llm,
            policy,
            mode: RwLock::new(mode),
        }
    }

    /// Builds an arbiter for the configured workspace, arbiter mode and LLM.
    #[must_use]
    pub fn from_config(
        config: &GovernanceConfig,
        patterns: Vec<CompiledPattern>,
        policy: Arc<PolicyEngine>,
    ) -> Self {
        Self::new(
            HeuristicEngine::new(patterns),
            ExistenceEngine::new(&config.workspace_root),
            LlmEvaluator::from_settings(&config.llm),
            policy,
            config.arbiter_mode,
        )
    }

    /// Current arbiter mode.
    #[must_use]
    pub fn mode(&self) -> ArbiterMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches the arbiter mode.
    pub fn set_mode(&self, mode: ArbiterMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
        info!(?mode, "arbiter mode changed");
    }

    /// Policy engine used for grading.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Checks that every claimed path exists inside the workspace.
    pub async fn validate_claim<S: AsRef<str>>(&self, paths: &[S]) -> ClaimReport {
        self.existence.validate_claim(paths).await
    }

    async fn load_content(&self, event: &SentinelEvent) -> Option<String> {
        if let Some(content) = &event.content {
            return Some(content.clone());
        }
        let path = self.existence.resolve(&event.path)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                warn!(path = %event.path, error = %err, "could not read event content");
                None
            }
        }
    }

    /// Evaluates one file event.
    pub async fn evaluate_event(&self, event: &SentinelEvent) -> SentinelVerdict {
        self.assess(event).await.verdict
    }

    /// Evaluates one file event and reports the hash of the evaluated content.
    ///
    /// The final decision is the most restrictive of the heuristic, existence
    /// and LLM signals; the grade is the higher of the policy grade and the
    /// grade implied by the worst finding.
    pub async fn assess(&self, event: &SentinelEvent) -> Assessment {
        let content = self.load_content(event).await;
        let artifact_hash = content.as_deref().map(|text| sha256_hex(text.as_bytes()));
        let text = content.as_deref().unwrap_or_default();
        let mut actions = vec!["heuristic-scan".to_owned()];

        let report = self.heuristics.analyze(&event.path, text);
        let mut decision = report
            .max_severity()
            .map_or(VerdictDecision::Pass, decision_for_severity);
        let mut grade = self.policy.classify_risk(&event.path, content.as_deref());
        if let Some(severity) = report.max_severity() {
            grade = grade.max(grade_for_severity(severity));
        }
        let mut matched = report.pattern_ids();
        let mut details = Vec::new();
        if content.is_none() {
            details.push("content unavailable".to_owned());
        }
        if report.truncated {
            details.push("content truncated for analysis".to_owned());
        }
        for finding in &report.findings {
            details.push(format!(
                "{} [{}] x{}",
                finding.name, finding.severity, finding.occurrences
            ));
        }

        if !event.claimed_paths.is_empty() {
            actions.push("existence-check".to_owned());
            match self.existence.validate_claim(&event.claimed_paths).await {
                ClaimReport::Checked { findings, .. } => {
                    for finding in findings {
                        let verdict = match finding.violation {
                            ClaimViolation::EscapesRoot => VerdictDecision::Quarantine,
                            ClaimViolation::Missing => VerdictDecision::Block,
                        };
                        decision = decision.max(verdict);
                        grade = grade.max(grade_for_severity(finding.violation.severity()));
                        matched.push(violation_pattern(finding.violation).to_owned());
                        details.push(format!("claimed path {} {:?}", finding.path, finding.violation));
                    }
                }
                ClaimReport::Unavailable { reason } => details.push(reason),
            }
        }

        let mut confidence = heuristic_confidence(&report.severities());
        let mut llm_evaluated = false;
        if should_consult_llm(self.mode(), &report) {
            match self.llm.evaluate(&event.path, text, &report).await {
                LlmOutcome::Answered {
                    response,
                    decision: llm_decision,
                    confidence: llm_confidence,
                } => {
                    llm_evaluated = true;
                    confidence = llm_confidence;
                    actions.push("llm-review".to_owned());
                    match llm_decision {
                        Some(LlmDecision::Deny) => decision = decision.max(VerdictDecision::Block),
                        Some(LlmDecision::Escalate) => {
                            decision = decision.max(VerdictDecision::Escalate);
                        }
                        Some(LlmDecision::Allow) | None => {}
                    }
                    details.push(format!("llm: {}", response.trim()));
                }
                LlmOutcome::Unavailable { reason } => {
                    debug!(path = %event.path, %reason, "LLM skipped");
                }
            }
        }
        if decision == VerdictDecision::Escalate {
            grade = RiskGrade::L3;
        }

        let summary = if matched.is_empty() {
            format!("{decision}: no findings in {}", event.path)
        } else {
            format!("{decision}: {} finding(s) in {}", matched.len(), event.path)
        };
        info!(
            path = %event.path,
            decision = %decision,
            grade = %grade,
            confidence,
            llm_evaluated,
            "verdict reached"
        );

        let mut builder = SentinelVerdict::builder(event.path.clone(), decision, grade)
            .agent(event.agent.clone())
            .confidence(confidence)
            .matched_patterns(matched)
            .summary(summary)
            .details(details.join("; "))
            .llm_evaluated(llm_evaluated);
        for action in actions {
            builder = builder.action(action);
        }
        Assessment {
            verdict: builder.build(),
            artifact_hash,
        }
    }
}
