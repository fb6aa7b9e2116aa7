//! Verification requirements and policy decisions.

use agent_primitives::{OperationalMode, Persona, RiskGrade};
use serde::{Deserialize, Serialize};

/// How a change of a given grade must be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Heuristic pass on a sample of changes.
    SampledHeuristic,
    /// Heuristic pass on every change.
    FullHeuristic,
    /// Human review backed by formal checks.
    HumanPlusFormal,
}

impl VerificationMethod {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SampledHeuristic => "sampled_heuristic",
            Self::FullHeuristic => "full_heuristic",
            Self::HumanPlusFormal => "human_plus_formal",
        }
    }
}

/// Fixed verification policy for one risk grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequirement {
    /// Grade the requirement applies to.
    pub grade: RiskGrade,
    /// Verification method.
    pub method: VerificationMethod,
    /// Whether the change proceeds without further approval.
    pub auto_approve: bool,
    /// Persona with approval authority.
    pub authority: Persona,
}

impl VerificationRequirement {
    /// Requirement table: L1 sampled and auto-approved by the sentinel, L2 fully
    /// checked by the sentinel, L3 human-plus-formal under the overseer.
    #[must_use]
    pub const fn for_grade(grade: RiskGrade) -> Self {
        match grade {
            RiskGrade::L1 => Self {
                grade,
                method: VerificationMethod::SampledHeuristic,
                auto_approve: true,
                authority: Persona::Sentinel,
            },
            RiskGrade::L2 => Self {
                grade,
                method: VerificationMethod::FullHeuristic,
                auto_approve: false,
                authority: Persona::Sentinel,
            },
            RiskGrade::L3 => Self {
                grade,
                method: VerificationMethod::HumanPlusFormal,
                auto_approve: false,
                authority: Persona::Overseer,
            },
        }
    }
}

/// Share of changes verified under an operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    /// Fraction in `[0, 1]` of changes to verify.
    pub rate: f64,
    /// Whether a human must approve regardless of other rules.
    pub human_approval_required: bool,
}

impl SamplingPlan {
    /// Sampling table per operational mode and grade.
    ///
    /// | mode   | L1   | L2  | L3  |
    /// |--------|------|-----|-----|
    /// | normal | 0.10 | 1.0 | 1.0 |
    /// | lean   | 0.05 | 0.5 | 1.0 |
    /// | surge  | 0    | 1.0 | 1.0 |
    /// | safe   | 0    | 0   | 1.0, human approval mandatory |
    #[must_use]
    pub fn for_mode(mode: OperationalMode, grade: RiskGrade) -> Self {
        let rate = match (mode, grade) {
            (_, RiskGrade::L3) => 1.0,
            (OperationalMode::Normal, RiskGrade::L1) => 0.1,
            (OperationalMode::Lean, RiskGrade::L1) => 0.05,
            (OperationalMode::Lean, RiskGrade::L2) => 0.5,
            (OperationalMode::Surge | OperationalMode::Safe, RiskGrade::L1)
            | (OperationalMode::Safe, RiskGrade::L2) => 0.0,
            (OperationalMode::Normal | OperationalMode::Surge, RiskGrade::L2) => 1.0,
        };
        Self {
            rate,
            human_approval_required: mode == OperationalMode::Safe && grade == RiskGrade::L3,
        }
    }

    /// Whether processing of this grade is deferred entirely.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.rate <= 0.0
    }

    /// Whether a change with the uniform `sample` in `[0, 1)` gets verified.
    #[must_use]
    pub fn selects(&self, sample: f64) -> bool {
        sample < self.rate
    }
}

/// What the policy engine concluded for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    /// The action may proceed.
    Allow,
    /// The action is refused.
    Deny,
    /// The action waits for the named approvers.
    Escalate {
        /// Personas or principals who can release the action.
        approvers: Vec<String>,
    },
}

/// A graded decision with the verification it implies.
///
/// The reason is always present so that transparency events and ledger
/// entries can explain every outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    /// Outcome.
    #[serde(flatten)]
    pub kind: DecisionKind,
    /// Verification required for the grade.
    pub requirement: VerificationRequirement,
    /// Human-readable explanation.
    pub reason: String,
}

impl PolicyDecision {
    fn new(kind: DecisionKind, requirement: VerificationRequirement, reason: String) -> Self {
        Self {
            kind,
            requirement,
            reason,
        }
    }

    /// Permits the action.
    #[must_use]
    pub fn allow(requirement: VerificationRequirement, reason: impl Into<String>) -> Self {
        Self::new(DecisionKind::Allow, requirement, reason.into())
    }

    /// Refuses the action.
    #[must_use]
    pub fn deny(requirement: VerificationRequirement, reason: impl Into<String>) -> Self {
        Self::new(DecisionKind::Deny, requirement, reason.into())
    }

    /// Holds the action for `approvers`.
    #[must_use]
    pub fn escalate(
        requirement: VerificationRequirement,
        reason: impl Into<String>,
        approvers: Vec<String>,
    ) -> Self {
        Self::new(DecisionKind::Escalate { approvers }, requirement, reason.into())
    }

    /// Whether the action may proceed.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self.kind, DecisionKind::Allow)
    }

    /// Whether the action is refused.
    #[must_use]
    pub fn is_deny(&self) -> bool {
        matches!(self.kind, DecisionKind::Deny)
    }

    /// Whether the action waits for approval.
    #[must_use]
    pub fn is_escalate(&self) -> bool {
        matches!(self.kind, DecisionKind::Escalate { .. })
    }

    /// Grade the decision was made for.
    #[must_use]
    pub fn risk_grade(&self) -> RiskGrade {
        self.requirement.grade
    }

    /// Approvers named by an escalation; empty otherwise.
    #[must_use]
    pub fn required_approvals(&self) -> &[String] {
        match &self.kind {
            DecisionKind::Escalate { approvers } => approvers,
            DecisionKind::Allow | DecisionKind::Deny => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_table() {
        let l1 = VerificationRequirement::for_grade(RiskGrade::L1);
        assert!(l1.auto_approve);
        assert_eq!(l1.authority, Persona::Sentinel);
        assert_eq!(l1.method, VerificationMethod::SampledHeuristic);

        let l2 = VerificationRequirement::for_grade(RiskGrade::L2);
        assert!(!l2.auto_approve);
        assert_eq!(l2.method, VerificationMethod::FullHeuristic);

        let l3 = VerificationRequirement::for_grade(RiskGrade::L3);
        assert_eq!(l3.authority, Persona::Overseer);
        assert_eq!(l3.method, VerificationMethod::HumanPlusFormal);
    }

    #[test]
    fn surge_defers_l1_and_safe_only_processes_l3() {
        assert!(SamplingPlan::for_mode(OperationalMode::Surge, RiskGrade::L1).is_deferred());
        assert!(!SamplingPlan::for_mode(OperationalMode::Surge, RiskGrade::L2).is_deferred());

        let safe_l2 = SamplingPlan::for_mode(OperationalMode::Safe, RiskGrade::L2);
        assert!(safe_l2.is_deferred());
        let safe_l3 = SamplingPlan::for_mode(OperationalMode::Safe, RiskGrade::L3);
        assert!(safe_l3.human_approval_required);
        assert!(safe_l3.selects(0.999));

        let normal_l1 = SamplingPlan::for_mode(OperationalMode::Normal, RiskGrade::L1);
        assert!(normal_l1.selects(0.05));
        assert!(!normal_l1.selects(0.5));
        assert!(!SamplingPlan::for_mode(OperationalMode::Normal, RiskGrade::L3).human_approval_required);
    }

    #[test]
    fn only_escalations_name_approvers() {
        let l3 = VerificationRequirement::for_grade(RiskGrade::L3);
        let held = PolicyDecision::escalate(l3, "auth path", vec!["overseer".into()]);
        assert!(held.is_escalate());
        assert_eq!(held.risk_grade(), RiskGrade::L3);
        assert_eq!(held.required_approvals(), ["overseer"]);

        let refused = PolicyDecision::deny(l3, "no intent");
        assert!(refused.is_deny() && !refused.is_allow());
        assert!(refused.required_approvals().is_empty());
        assert_eq!(refused.reason, "no intent");
    }

    #[test]
    fn decisions_serialize_flat() {
        let held = PolicyDecision::escalate(
            VerificationRequirement::for_grade(RiskGrade::L3),
            "auth path",
            vec!["overseer".into()],
        );
        let json = serde_json::to_value(&held).unwrap();
        assert_eq!(json["kind"], "escalate");
        assert_eq!(json["approvers"][0], "overseer");
        assert_eq!(json["reason"], "auth path");
        assert_eq!(json["requirement"]["method"], "human_plus_formal");
    }
}
