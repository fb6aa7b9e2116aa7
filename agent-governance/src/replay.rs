//! Re-evaluation of recorded governance decisions against current policy.
//!
//! A replay re-evaluates the artifact of a `GOVERNANCE_RESUMED` or
//! `GOVERNANCE_PAUSED` entry under the governance mode and intent coverage
//! recorded with it, and compares the outcome with what was recorded.
//! Entries written before those fields existed fall back to the grade alone:
//! L3 pauses, anything lower resumes. Decisions rejected on their nonce never
//! reached the policy and are not replayable. Policy and artifact drift are
//! reported as warnings independent of whether the decision itself still
//! matches.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use agent_ledger::{Ledger, LedgerEntry, sha256_hex};
use agent_policy::{PolicyEngine, PolicyRequest};
use agent_primitives::{GovernanceMode, LedgerEventType, RiskGrade};
use agent_telemetry::{EventBus, GovernanceEvent};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::apply_mode;
use crate::{GovernanceError, GovernanceResult};

/// Drift observed while replaying, reported alongside the comparison.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayWarning {
    /// The policy configuration changed since the decision.
    PolicyHashMismatch {
        /// Hash stored with the entry, if any.
        recorded: Option<String>,
        /// Hash of the policy now in force.
        current: String,
    },
    /// The artifact on disk differs from the one evaluated.
    ArtifactHashMismatch {
        /// Hash stored with the entry.
        recorded: String,
        /// Hash of the file now.
        current: String,
    },
    /// The artifact no longer exists.
    ArtifactMissing,
}

impl fmt::Display for ReplayWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyHashMismatch { recorded, current } => write!(
                f,
                "policy hash changed: {} -> {current}",
                recorded.as_deref().unwrap_or("none")
            ),
            Self::ArtifactHashMismatch { .. } => f.write_str("artifact content changed"),
            Self::ArtifactMissing => f.write_str("artifact missing"),
        }
    }
}

/// Comparison of one recorded decision with its replay.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    /// Replayed ledger entry.
    pub entry_id: i64,
    /// Artifact the entry concerns.
    pub artifact_path: String,
    /// Grade recorded with the entry.
    pub recorded_grade: Option<RiskGrade>,
    /// Grade assigned now.
    pub replayed_grade: RiskGrade,
    /// Event type recorded.
    pub recorded_event: LedgerEventType,
    /// Event type the replayed decision implies.
    pub expected_event: LedgerEventType,
    /// Whether grade and decision agree.
    pub matched: bool,
    /// Why they disagree.
    pub divergence_reason: Option<String>,
    /// Drift warnings.
    pub warnings: Vec<ReplayWarning>,
}

impl ReplayResult {
    /// Whether the replay diverged or raised warnings.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.matched || !self.warnings.is_empty()
    }
}

/// Outcome of replaying several entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBatch {
    /// Successful replays, in request order.
    pub results: Vec<ReplayResult>,
    /// Entries that could not be replayed, with the reason.
    pub failures: Vec<(i64, String)>,
    /// Replays whose decision still matches.
    pub matched: usize,
    /// Replays whose decision diverged.
    pub diverged: usize,
    /// Replays that raised at least one warning.
    pub with_warnings: usize,
}

/// Replays governance decisions from the ledger.
#[derive(Clone)]
pub struct ReplayEngine {
    ledger: Arc<Ledger>,
    policy: Arc<PolicyEngine>,
    events: Arc<dyn EventBus>,
    workspace_root: PathBuf,
}

impl fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

const fn event_for_grade(grade: RiskGrade) -> LedgerEventType {
    match grade {
        RiskGrade::L3 => LedgerEventType::GovernancePaused,
        RiskGrade::L1 | RiskGrade::L2 => LedgerEventType::GovernanceResumed,
    }
}

fn hashes_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl ReplayEngine {
    /// Engine resolving artifacts under `workspace_root`.
    #[must_use]
    pub fn new(
        ledger: Arc<Ledger>,
        policy: Arc<PolicyEngine>,
        events: Arc<dyn EventBus>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            policy,
            events,
            workspace_root: workspace_root.into(),
        }
    }

    /// Replays entry `entry_id`.
    ///
    /// # Errors
    ///
    /// Ledger errors (including [`agent_ledger::LedgerError::NotFound`]), and
    /// [`GovernanceError::NotReplayable`] for entries that are not
    /// governance decisions about an artifact.
    pub async fn replay(&self, entry_id: i64) -> GovernanceResult<ReplayResult> {
        let entry = self.ledger.get_entry_by_id_async(entry_id).await?;
        self.replay_entry(&entry).await
    }

    async fn replay_entry(&self, entry: &LedgerEntry) -> GovernanceResult<ReplayResult> {
        if !matches!(
            entry.event_type,
            LedgerEventType::GovernanceResumed | LedgerEventType::GovernancePaused
        ) {
            return Err(GovernanceError::NotReplayable {
                id: entry.id,
                reason: format!("{} is not a governance decision", entry.event_type),
            });
        }
        if entry.payload_bool("nonceRejected") == Some(true) {
            return Err(GovernanceError::NotReplayable {
                id: entry.id,
                reason: "nonce was rejected before policy evaluation".to_owned(),
            });
        }
        let Some(artifact_path) = entry.artifact_path.clone() else {
            return Err(GovernanceError::NotReplayable {
                id: entry.id,
                reason: "entry has no artifact path".to_owned(),
            });
        };

        let on_disk = tokio::fs::read(self.workspace_root.join(&artifact_path)).await.ok();
        let content = on_disk
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
        let policy_request = PolicyRequest::new(artifact_path.clone())
            .with_content(content)
            .with_active_intent(entry.payload_bool("intentActive").unwrap_or(false));
        let policy_decision = self.policy.evaluate(&policy_request);
        let replayed_grade = policy_decision.risk_grade();
        let recorded_mode = entry
            .payload_str("governanceMode")
            .and_then(|mode| mode.parse::<GovernanceMode>().ok());
        let expected = match recorded_mode {
            Some(mode) => {
                let request_id = entry
                    .payload_str("requestId")
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .unwrap_or_default();
                if apply_mode(request_id, mode, &policy_decision).allowed {
                    LedgerEventType::GovernanceResumed
                } else {
                    LedgerEventType::GovernancePaused
                }
            }
            None => event_for_grade(replayed_grade),
        };

        let divergence_reason = match entry.risk_grade {
            Some(recorded) if recorded != replayed_grade => {
                Some(format!("risk grade changed: {recorded} -> {replayed_grade}"))
            }
            _ if entry.event_type != expected => {
                Some(format!("decision changed: {} -> {expected}", entry.event_type))
            }
            _ => None,
        };

        let mut warnings = Vec::new();
        let current_policy = self.policy.get_policy_hash();
        let recorded_policy = entry.payload_str("policyHash");
        if !recorded_policy.is_some_and(|recorded| hashes_equal(recorded, &current_policy)) {
            warnings.push(ReplayWarning::PolicyHashMismatch {
                recorded: recorded_policy.map(str::to_owned),
                current: current_policy,
            });
        }
        if let Some(recorded) = &entry.artifact_hash {
            match &on_disk {
                None => warnings.push(ReplayWarning::ArtifactMissing),
                Some(bytes) => {
                    let current = sha256_hex(bytes);
                    if !hashes_equal(recorded, &current) {
                        warnings.push(ReplayWarning::ArtifactHashMismatch {
                            recorded: recorded.clone(),
                            current,
                        });
                    }
                }
            }
        }

        let result = ReplayResult {
            entry_id: entry.id,
            artifact_path,
            recorded_grade: entry.risk_grade,
            replayed_grade,
            recorded_event: entry.event_type,
            expected_event: expected,
            matched: divergence_reason.is_none(),
            divergence_reason,
            warnings,
        };

        if result.has_drift() {
            warn!(
                entry = result.entry_id,
                path = %result.artifact_path,
                divergence = ?result.divergence_reason,
                warnings = result.warnings.len(),
                "replay drift detected"
            );
            self.events.publish(GovernanceEvent::DriftDetected {
                entry_id: result.entry_id,
                divergence: result.divergence_reason.clone(),
                warnings: result.warnings.iter().map(ToString::to_string).collect(),
            });
        } else {
            debug!(entry = result.entry_id, "replay matched");
        }
        Ok(result)
    }

    /// Replays each of `entry_ids`; individual failures do not stop the batch.
    pub async fn replay_batch(&self, entry_ids: &[i64]) -> ReplayBatch {
        let mut batch = ReplayBatch::default();
        for &id in entry_ids {
            match self.replay(id).await {
                Ok(result) => batch.push(result),
                Err(err) => batch.failures.push((id, err.to_string())),
            }
        }
        batch
    }

    /// Replays the governance decisions among the `limit` newest entries.
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger cannot be read.
    pub async fn replay_recent(&self, limit: usize) -> GovernanceResult<ReplayBatch> {
        let mut batch = ReplayBatch::default();
        for entry in self.ledger.get_recent_entries_async(limit).await? {
            match self.replay_entry(&entry).await {
                Ok(result) => batch.push(result),
                Err(GovernanceError::NotReplayable { .. }) => {}
                Err(err) => batch.failures.push((entry.id, err.to_string())),
            }
        }
        Ok(batch)
    }
}

impl ReplayBatch {
    fn push(&mut self, result: ReplayResult) {
        if result.matched {
            self.matched += 1;
        } else {
            self.diverged += 1;
        }
        if !result.warnings.is_empty() {
            self.with_warnings += 1;
        }
        self.results.push(result);
    }
}
