//! Trust arithmetic and the persisted agent identity.

use std::fmt::{self, Display, Formatter};

use agent_primitives::{AgentDid, IBT_THRESHOLD, KBT_THRESHOLD, Persona, TrustStage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Score assigned to newly registered agents.
pub const DEFAULT_TRUST: f64 = 0.35;
/// Minimum score while an agent is on probation.
pub const PROBATION_FLOOR: f64 = 0.35;
/// Length of the probation window after registration, in days.
pub const PROBATION_DAYS: i64 = 30;
/// Influence ceiling during probation.
pub const PROBATION_INFLUENCE_CAP: f64 = 1.2;
/// Influence of a quarantined agent.
pub const QUARANTINED_INFLUENCE: f64 = 0.1;

const IBT_VIOLATION_CAP: f64 = 0.79;
const KBT_VIOLATION_CAP: f64 = 0.49;

/// Result of a verified action, fed back into the agent's score.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustOutcome {
    /// The action verified cleanly.
    Success,
    /// The action failed verification or was rejected.
    Failure,
    /// The action violated policy.
    Violation,
}

impl TrustOutcome {
    /// Score delta applied before clamping and caps.
    #[must_use]
    pub const fn delta(self) -> f64 {
        match self {
            Self::Success => 0.05,
            Self::Failure => -0.10,
            Self::Violation => -0.25,
        }
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Violation => "violation",
        }
    }
}

impl Display for TrustOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes the next score.
///
/// The delta is applied and clamped to `[0, 1]`; a violation then caps the
/// score strictly below the agent's current stage, probation lifts it back to
/// the floor, and the result is rounded to four decimals.
#[must_use]
pub fn next_score(current: f64, outcome: TrustOutcome, in_probation: bool) -> f64 {
    let mut score = (current + outcome.delta()).clamp(0.0, 1.0);

    if outcome == TrustOutcome::Violation {
        if current >= IBT_THRESHOLD {
            score = score.min(IBT_VIOLATION_CAP);
        } else if current >= KBT_THRESHOLD {
            score = score.min(KBT_VIOLATION_CAP);
        }
    }

    if in_probation {
        score = score.max(PROBATION_FLOOR);
    }

    (score * 10_000.0).round() / 10_000.0
}

/// Weight applied to an agent's effect on downstream decisions.
#[must_use]
pub fn influence_weight(score: f64, in_probation: bool, quarantined: bool) -> f64 {
    if quarantined {
        return QUARANTINED_INFLUENCE;
    }
    let weight = 0.5 + 1.5 * score;
    if in_probation {
        weight.min(PROBATION_INFLUENCE_CAP)
    } else {
        weight
    }
}

/// Persisted reputation of one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Agent identifier.
    pub did: AgentDid,
    /// Role of the agent.
    pub persona: Persona,
    /// Public key the DID was derived from; empty for auto-registered agents.
    pub public_key: String,
    /// Score in `[0, 1]`.
    pub trust_score: f64,
    /// Stage derived from the score.
    pub trust_stage: TrustStage,
    /// Whether the agent is isolated.
    pub is_quarantined: bool,
    /// Number of successful verifications.
    pub verification_count: u64,
    /// Registration time; starts the probation window.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-lock version, incremented on every write.
    pub version: i64,
    /// Revocation time; revoked agents stay quarantined forever.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AgentIdentity {
    /// Creates a freshly registered identity at the default score.
    #[must_use]
    pub fn new(
        did: AgentDid,
        persona: Persona,
        public_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            did,
            persona,
            public_key: public_key.into(),
            trust_score: DEFAULT_TRUST,
            trust_stage: TrustStage::from_score(DEFAULT_TRUST),
            is_quarantined: false,
            verification_count: 0,
            created_at: now,
            updated_at: now,
            version: 1,
            revoked_at: None,
        }
    }

    /// Whether `now` falls inside the probation window.
    #[must_use]
    pub fn in_probation(&self, now: DateTime<Utc>) -> bool {
        now < self.created_at + Duration::days(PROBATION_DAYS)
    }

    /// Whether the agent was revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Applies an outcome in place.
    pub fn apply(&mut self, outcome: TrustOutcome, now: DateTime<Utc>) {
        self.trust_score = next_score(self.trust_score, outcome, self.in_probation(now));
        self.trust_stage = TrustStage::from_score(self.trust_score);
        if outcome == TrustOutcome::Success {
            self.verification_count += 1;
        }
        self.updated_at = now;
    }

    /// Snapshot of the agent's standing.
    #[must_use]
    pub fn score(&self, now: DateTime<Utc>) -> TrustScore {
        let in_probation = self.in_probation(now);
        TrustScore {
            did: self.did.clone(),
            score: self.trust_score,
            stage: self.trust_stage,
            influence_weight: influence_weight(self.trust_score, in_probation, self.is_quarantined),
            in_probation,
            is_quarantined: self.is_quarantined,
            verification_count: self.verification_count,
        }
    }
}

/// Read-only view of an agent's standing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrustScore {
    /// Agent identifier.
    pub did: AgentDid,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Stage derived from the score.
    pub stage: TrustStage,
    /// Weight of the agent's effect on downstream decisions.
    pub influence_weight: f64,
    /// Whether the probation floor applies.
    pub in_probation: bool,
    /// Whether the agent is isolated.
    pub is_quarantined: bool,
    /// Number of successful verifications.
    pub verification_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn deltas_apply_and_round() {
        assert!(approx(next_score(0.6, TrustOutcome::Success, false), 0.65));
        assert!(approx(next_score(0.6, TrustOutcome::Failure, false), 0.5));
        assert!(approx(next_score(0.1, TrustOutcome::Failure, false), 0.0));
        assert!(approx(next_score(0.98, TrustOutcome::Success, false), 1.0));
    }

    #[test]
    fn violations_force_a_stage_drop() {
        let from_ibt = next_score(0.95, TrustOutcome::Violation, false);
        assert!(from_ibt <= 0.79);
        assert_eq!(TrustStage::from_score(from_ibt), TrustStage::Kbt);

        let from_top = next_score(1.0, TrustOutcome::Violation, false);
        assert!(approx(from_top, 0.75));

        let from_kbt = next_score(0.7, TrustOutcome::Violation, false);
        assert!(from_kbt <= 0.49);
        assert_eq!(TrustStage::from_score(from_kbt), TrustStage::Cbt);

        let edge = next_score(0.8, TrustOutcome::Violation, false);
        assert!(edge <= 0.79);
    }

    #[test]
    fn probation_floor_holds_regardless_of_delta() {
        assert!(approx(next_score(0.35, TrustOutcome::Violation, true), 0.35));
        assert!(approx(next_score(0.4, TrustOutcome::Failure, true), 0.35));
        assert!(approx(next_score(0.35, TrustOutcome::Success, true), 0.4));
    }

    #[test]
    fn score_stays_in_unit_interval_for_any_sequence() {
        let outcomes = [
            TrustOutcome::Success,
            TrustOutcome::Violation,
            TrustOutcome::Failure,
            TrustOutcome::Success,
            TrustOutcome::Success,
        ];
        let mut score = DEFAULT_TRUST;
        for step in 0..500 {
            score = next_score(score, outcomes[step % outcomes.len()], step % 7 == 0);
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn influence_weight_rules() {
        assert!(approx(influence_weight(0.5, false, false), 1.25));
        assert!(approx(influence_weight(0.5, true, false), 1.2));
        assert!(approx(influence_weight(0.9, false, true), 0.1));
    }

    #[test]
    fn success_counts_verifications_only() {
        let now = Utc::now();
        let did = AgentDid::derive(Persona::Scrivener, "pk");
        let mut agent = AgentIdentity::new(did, Persona::Scrivener, "pk", now);
        agent.apply(TrustOutcome::Success, now);
        agent.apply(TrustOutcome::Failure, now);
        assert_eq!(agent.verification_count, 1);
        assert!(agent.in_probation(now));
        assert!(!agent.in_probation(now + Duration::days(31)));
    }
}
