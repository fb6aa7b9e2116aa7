//! Risk classification engine.

use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use agent_primitives::{OperationalMode, RiskGrade};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::contracts::{PolicyConfig, PolicyRequest, TriggerList};
use crate::decision::{PolicyDecision, SamplingPlan, VerificationRequirement};
use crate::PolicyResult;

/// Approver named on escalated decisions.
pub const ESCALATION_APPROVER: &str = "overseer";

/// Risk grade together with the trigger that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Assigned grade.
    pub grade: RiskGrade,
    /// List and trigger that matched, when any did.
    pub matched: Option<(TriggerList, String)>,
}

/// Stateless-per-call risk classifier with swappable configuration.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    config: RwLock<PolicyConfig>,
    mode: RwLock<OperationalMode>,
}

fn first_match(haystack: &str, triggers: &[String]) -> Option<String> {
    triggers
        .iter()
        .find(|trigger| haystack.contains(&trigger.to_lowercase()))
        .cloned()
}

impl PolicyEngine {
    /// Creates an engine over `config` in [`OperationalMode::Normal`].
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config: RwLock::new(config),
            mode: RwLock::new(OperationalMode::Normal),
        }
    }

    /// Sets the initial operational mode.
    #[must_use]
    pub fn with_mode(self, mode: OperationalMode) -> Self {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
        self
    }

    /// Loads JSON overrides from `dir` (see [`PolicyConfig::load_overrides`]).
    pub async fn from_policy_dir(dir: Option<&Path>) -> Self {
        Self::new(PolicyConfig::load_overrides(dir).await)
    }

    fn config(&self) -> RwLockReadGuard<'_, PolicyConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the active configuration.
    #[must_use]
    pub fn config_snapshot(&self) -> PolicyConfig {
        self.config().clone()
    }

    /// Applies `change` to the configuration after validating the result.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`](crate::PolicyError::InvalidRule)
    /// and leaves the configuration untouched when the result is invalid.
    pub fn update_config(&self, change: impl FnOnce(&mut PolicyConfig)) -> PolicyResult<()> {
        let mut next = self.config_snapshot();
        change(&mut next);
        next.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!(policy_hash = %self.get_policy_hash(), "policy configuration updated");
        Ok(())
    }

    /// Classifies a change, reporting the trigger that decided it.
    ///
    /// Matching is case-insensitive and ordered: L3 path, L3 content, L2 path,
    /// L2 content. Without a match, documentation and test paths are L1 and
    /// everything else L2.
    #[must_use]
    pub fn classify(&self, path: &str, content: Option<&str>) -> Classification {
        let config = self.config();
        let path = path.replace('\\', "/").to_lowercase();
        let content = content.map(str::to_lowercase);

        let mut ordered: Vec<(TriggerList, RiskGrade, &str, &[String])> = vec![(
            TriggerList::L3Path,
            RiskGrade::L3,
            path.as_str(),
            config.l3_path_triggers.as_slice(),
        )];
        if let Some(content) = content.as_deref() {
            ordered.push((
                TriggerList::L3Content,
                RiskGrade::L3,
                content,
                config.l3_content_triggers.as_slice(),
            ));
        }
        ordered.push((
            TriggerList::L2Path,
            RiskGrade::L2,
            path.as_str(),
            config.l2_path_triggers.as_slice(),
        ));
        if let Some(content) = content.as_deref() {
            ordered.push((
                TriggerList::L2Content,
                RiskGrade::L2,
                content,
                config.l2_content_triggers.as_slice(),
            ));
        }

        for (list, grade, haystack, triggers) in ordered {
            if let Some(trigger) = first_match(haystack, triggers) {
                debug!(?list, %trigger, grade = grade.as_str(), "risk trigger matched");
                return Classification {
                    grade,
                    matched: Some((list, trigger)),
                };
            }
        }

        match first_match(&path, &config.low_risk_path_markers) {
            Some(marker) => Classification {
                grade: RiskGrade::L1,
                matched: Some((TriggerList::LowRiskPath, marker)),
            },
            None => Classification {
                grade: RiskGrade::L2,
                matched: None,
            },
        }
    }

    /// Classifies a change into a risk grade.
    #[must_use]
    pub fn classify_risk(&self, path: &str, content: Option<&str>) -> RiskGrade {
        self.classify(path, content).grade
    }

    /// Fixed verification requirement for `grade`.
    #[must_use]
    pub fn get_verification_requirements(&self, grade: RiskGrade) -> VerificationRequirement {
        VerificationRequirement::for_grade(grade)
    }

    /// Current operational mode.
    #[must_use]
    pub fn operational_mode(&self) -> OperationalMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches the operational mode.
    pub fn set_operational_mode(&self, mode: OperationalMode) {
        let mut current = self.mode.write().unwrap_or_else(PoisonError::into_inner);
        if *current != mode {
            info!(from = %*current, to = %mode, "operational mode changed");
            *current = mode;
        }
    }

    /// Sampling plan for `grade` under the current mode.
    #[must_use]
    pub fn sampling_plan(&self, grade: RiskGrade) -> SamplingPlan {
        SamplingPlan::for_mode(self.operational_mode(), grade)
    }

    /// Draws a sample and reports whether a change of `grade` gets verified.
    #[must_use]
    pub fn should_verify(&self, grade: RiskGrade) -> bool {
        self.sampling_plan(grade)
            .selects(rand::thread_rng().r#gen::<f64>())
    }

    /// First 16 hex characters of the SHA-256 of the serialized configuration.
    #[must_use]
    pub fn get_policy_hash(&self) -> String {
        let serialized = serde_json::to_vec(&*self.config()).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(&serialized));
        digest[..16].to_owned()
    }

    /// Decides whether a change may proceed.
    ///
    /// Allowed when an active intent covers it or its grade auto-approves
    /// (auto-approval is suspended in safe mode). Otherwise L3 escalates to the
    /// overseer and lower grades are denied pending an intent.
    #[must_use]
    pub fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        let grade = self.classify_risk(request.artifact_path(), request.content());
        let requirement = self.get_verification_requirements(grade);
        let safe_mode = self.operational_mode() == OperationalMode::Safe;

        if request.intent_active() && !(safe_mode && grade == RiskGrade::L3) {
            return PolicyDecision::allow(requirement, "covered by active intent");
        }
        if requirement.auto_approve && !safe_mode {
            return PolicyDecision::allow(requirement, "grade auto-approves");
        }
        if grade == RiskGrade::L3 {
            return PolicyDecision::escalate(
                requirement,
                "L3 change requires overseer approval",
                vec![ESCALATION_APPROVER.to_owned()],
            );
        }
        PolicyDecision::deny(requirement, format!("{grade} change requires an active intent"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionKind;

    #[test]
    fn reference_paths_classify_as_expected() {
        let engine = PolicyEngine::default();
        assert_eq!(engine.classify_risk("src/auth/login.ts", None), RiskGrade::L3);
        assert_eq!(engine.classify_risk("README.md", None), RiskGrade::L1);
        assert_eq!(engine.classify_risk("src/util/helper.ts", None), RiskGrade::L2);
    }

    #[test]
    fn content_triggers_and_ordering() {
        let engine = PolicyEngine::default();
        let graded = engine.classify("docs/notes.md", Some("const API_KEY = 'x'"));
        assert_eq!(graded.grade, RiskGrade::L3);
        assert_eq!(graded.matched, Some((TriggerList::L3Content, "api_key".into())));

        let graded = engine.classify("src/util/fetcher.ts", Some("await fetch(url)"));
        assert_eq!(graded.grade, RiskGrade::L2);
        assert_eq!(graded.matched.map(|(list, _)| list), Some(TriggerList::L2Content));

        // Path triggers win over the low-risk fallback.
        assert_eq!(engine.classify_risk("docs/api/index.md", None), RiskGrade::L2);
        assert_eq!(engine.classify_risk("SRC\\Security\\Keys.rs", None), RiskGrade::L3);
    }

    #[test]
    fn policy_hash_is_stable_and_tracks_changes() {
        let engine = PolicyEngine::default();
        let original = engine.get_policy_hash();
        assert_eq!(original.len(), 16);
        assert_eq!(original, PolicyEngine::default().get_policy_hash());

        engine
            .update_config(|config| config.l3_path_triggers.push("vault".into()))
            .unwrap();
        assert_ne!(engine.get_policy_hash(), original);
        assert_eq!(engine.classify_risk("src/vault/store.ts", None), RiskGrade::L3);
    }

    #[test]
    fn invalid_updates_leave_config_untouched() {
        let engine = PolicyEngine::default();
        let before = engine.get_policy_hash();
        assert!(engine.update_config(|config| config.l2_path_triggers.push(String::new())).is_err());
        assert_eq!(engine.get_policy_hash(), before);
    }

    #[test]
    fn evaluation_respects_intent_and_grade() {
        let engine = PolicyEngine::default();
        let docs = engine.evaluate(&PolicyRequest::new("README.md"));
        assert!(docs.is_allow());

        let helper = engine.evaluate(&PolicyRequest::new("src/util/helper.ts"));
        assert_eq!(helper.kind, DecisionKind::Deny);
        let helper = engine
            .evaluate(&PolicyRequest::new("src/util/helper.ts").with_active_intent(true));
        assert!(helper.is_allow());

        let login = engine.evaluate(&PolicyRequest::new("src/auth/login.ts"));
        assert!(login.is_escalate());
        assert_eq!(login.required_approvals(), [ESCALATION_APPROVER]);
    }

    #[test]
    fn safe_mode_requires_humans_for_l3_and_suspends_auto_approval() {
        let engine = PolicyEngine::default().with_mode(OperationalMode::Safe);
        let login = engine
            .evaluate(&PolicyRequest::new("src/auth/login.ts").with_active_intent(true));
        assert!(login.is_escalate());
        assert!(!engine.evaluate(&PolicyRequest::new("README.md")).is_allow());
        assert!(engine.sampling_plan(RiskGrade::L3).human_approval_required);
        assert!(!engine.should_verify(RiskGrade::L1));

        engine.set_operational_mode(OperationalMode::Normal);
        assert!(engine.should_verify(RiskGrade::L2));
    }
}
