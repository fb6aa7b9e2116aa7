//! Sentinel verdicts produced by the arbitration pipeline.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AgentDid, RiskGrade};

/// Decision carried by a verdict, ordered from least to most restrictive.
///
/// An escalation can still be approved by a human, so it ranks below a
/// block: combining signals with `max` never turns a block into something
/// an overseer could release.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictDecision {
    /// No concerns.
    Pass,
    /// Concerns worth surfacing, change may proceed.
    Warn,
    /// Change needs a human decision.
    Escalate,
    /// Change must not proceed.
    Block,
    /// The authoring agent must be isolated.
    Quarantine,
}

impl VerdictDecision {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Block => "BLOCK",
            Self::Escalate => "ESCALATE",
            Self::Quarantine => "QUARANTINE",
        }
    }
}

impl Display for VerdictDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a heuristic or existence finding.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth a warning.
    Medium,
    /// Needs attention before merge.
    High,
    /// Must block.
    Critical,
}

impl Severity {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable verdict for one evaluated event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentinelVerdict {
    id: Uuid,
    timestamp: DateTime<Utc>,
    artifact_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_did: Option<AgentDid>,
    decision: VerdictDecision,
    risk_grade: RiskGrade,
    confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    matched_patterns: Vec<String>,
    summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    actions_taken: Vec<String>,
    #[serde(default)]
    llm_evaluated: bool,
}

impl SentinelVerdict {
    /// Starts building a verdict for the supplied artifact.
    #[must_use]
    pub fn builder(
        artifact_path: impl Into<String>,
        decision: VerdictDecision,
        risk_grade: RiskGrade,
    ) -> SentinelVerdictBuilder {
        SentinelVerdictBuilder {
            artifact_path: artifact_path.into(),
            agent_did: None,
            decision,
            risk_grade,
            confidence: 1.0,
            matched_patterns: Vec::new(),
            summary: String::new(),
            details: String::new(),
            actions_taken: Vec::new(),
            llm_evaluated: false,
        }
    }

    /// Unique verdict identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Moment the verdict was produced.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Path of the evaluated artifact, relative to the workspace root.
    #[must_use]
    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }

    /// Agent that authored the change, when known.
    #[must_use]
    pub fn agent_did(&self) -> Option<&AgentDid> {
        self.agent_did.as_ref()
    }

    /// The verdict decision.
    #[must_use]
    pub fn decision(&self) -> VerdictDecision {
        self.decision
    }

    /// Risk grade of the evaluated artifact.
    #[must_use]
    pub fn risk_grade(&self) -> RiskGrade {
        self.risk_grade
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Identifiers of the patterns that matched.
    #[must_use]
    pub fn matched_patterns(&self) -> &[String] {
        &self.matched_patterns
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Free-text details.
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Actions the pipeline took while producing the verdict.
    #[must_use]
    pub fn actions_taken(&self) -> &[String] {
        &self.actions_taken
    }

    /// Whether an LLM contributed to the verdict.
    #[must_use]
    pub fn llm_evaluated(&self) -> bool {
        self.llm_evaluated
    }
}

/// Builder for [`SentinelVerdict`].
#[derive(Debug)]
pub struct SentinelVerdictBuilder {
    artifact_path: String,
    agent_did: Option<AgentDid>,
    decision: VerdictDecision,
    risk_grade: RiskGrade,
    confidence: f64,
    matched_patterns: Vec<String>,
    summary: String,
    details: String,
    actions_taken: Vec<String>,
    llm_evaluated: bool,
}

impl SentinelVerdictBuilder {
    /// Attributes the verdict to an agent.
    #[must_use]
    pub fn agent(mut self, did: Option<AgentDid>) -> Self {
        self.agent_did = did;
        self
    }

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    /// Records the identifiers of matched patterns.
    #[must_use]
    pub fn matched_patterns(mut self, patterns: Vec<String>) -> Self {
        self.matched_patterns = patterns;
        self
    }

    /// Sets the summary line.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Sets the details text.
    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Appends an action taken.
    #[must_use]
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions_taken.push(action.into());
        self
    }

    /// Marks whether an LLM contributed.
    #[must_use]
    pub fn llm_evaluated(mut self, evaluated: bool) -> Self {
        self.llm_evaluated = evaluated;
        self
    }

    /// Finalises the verdict.
    #[must_use]
    pub fn build(self) -> SentinelVerdict {
        SentinelVerdict {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            artifact_path: self.artifact_path,
            agent_did: self.agent_did,
            decision: self.decision,
            risk_grade: self.risk_grade,
            confidence: self.confidence,
            matched_patterns: self.matched_patterns,
            summary: self.summary,
            details: self.details,
            actions_taken: self.actions_taken,
            llm_evaluated: self.llm_evaluated,
        }
    }
}
