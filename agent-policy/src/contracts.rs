//! Policy configuration schema and evaluation requests.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{PolicyError, PolicyResult};

/// File name looked up inside the policy directory.
pub const OVERRIDES_FILE: &str = "risk_grading.json";

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

/// Ordered trigger lists driving risk classification.
///
/// Triggers are case-insensitive substrings. Lists present in an override file
/// replace the defaults; absent lists keep them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Path fragments that make a change L3.
    pub l3_path_triggers: Vec<String>,
    /// Content fragments that make a change L3.
    pub l3_content_triggers: Vec<String>,
    /// Path fragments that make a change L2.
    pub l2_path_triggers: Vec<String>,
    /// Content fragments that make a change L2.
    pub l2_content_triggers: Vec<String>,
    /// Path fragments marking documentation or tests, which default to L1.
    pub low_risk_path_markers: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            l3_path_triggers: owned(&[
                "auth",
                "login",
                "password",
                "crypto",
                "secret",
                "credential",
                "payment",
                "admin",
                "security",
                ".env",
                "private_key",
            ]),
            l3_content_triggers: owned(&[
                "password",
                "api_key",
                "secret_key",
                "private_key",
                "begin rsa private key",
                "drop table",
                "eval(",
            ]),
            l2_path_triggers: owned(&["api", "service", "database", "config", "migration", "schema"]),
            l2_content_triggers: owned(&["fetch(", "http", "select ", "insert ", "exec("]),
            low_risk_path_markers: owned(&[
                ".md",
                ".txt",
                ".rst",
                "docs/",
                "test",
                "spec",
                "__tests__",
            ]),
        }
    }
}

impl PolicyConfig {
    /// Parses an override document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Serialization`] for malformed JSON and
    /// [`PolicyError::InvalidRule`] for blank triggers.
    pub fn from_json_str(json: &str) -> PolicyResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects blank triggers, which would match every path.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`] naming the offending list.
    pub fn validate(&self) -> PolicyResult<()> {
        let lists = [
            ("l3PathTriggers", &self.l3_path_triggers),
            ("l3ContentTriggers", &self.l3_content_triggers),
            ("l2PathTriggers", &self.l2_path_triggers),
            ("l2ContentTriggers", &self.l2_content_triggers),
            ("lowRiskPathMarkers", &self.low_risk_path_markers),
        ];
        for (name, list) in lists {
            if list.iter().any(|trigger| trigger.trim().is_empty()) {
                return Err(PolicyError::InvalidRule(format!("{name} contains a blank entry")));
            }
        }
        Ok(())
    }

    /// Loads `risk_grading.json` from `dir`.
    ///
    /// A missing directory or file yields the defaults. An unreadable or
    /// invalid file is logged and also yields the defaults.
    pub async fn load_overrides(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::default();
        };
        let path = dir.join(OVERRIDES_FILE);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "policy overrides unreadable; using defaults");
                return Self::default();
            }
        };

        match Self::from_json_str(&json) {
            Ok(config) => {
                info!(path = %path.display(), "policy overrides loaded");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "policy overrides invalid; using defaults");
                Self::default()
            }
        }
    }
}

/// Which trigger list matched a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerList {
    /// [`PolicyConfig::l3_path_triggers`].
    L3Path,
    /// [`PolicyConfig::l3_content_triggers`].
    L3Content,
    /// [`PolicyConfig::l2_path_triggers`].
    L2Path,
    /// [`PolicyConfig::l2_content_triggers`].
    L2Content,
    /// [`PolicyConfig::low_risk_path_markers`].
    LowRiskPath,
}

/// Request evaluated by [`PolicyEngine::evaluate`](crate::PolicyEngine::evaluate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    artifact_path: String,
    content: Option<String>,
    intent_active: bool,
}

impl PolicyRequest {
    /// Creates a request for the supplied artifact path.
    #[must_use]
    pub fn new(artifact_path: impl Into<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            content: None,
            intent_active: false,
        }
    }

    /// Attaches the proposed content.
    #[must_use]
    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = content;
        self
    }

    /// Marks whether the request is covered by an active intent.
    #[must_use]
    pub fn with_active_intent(mut self, active: bool) -> Self {
        self.intent_active = active;
        self
    }

    /// Artifact path.
    #[must_use]
    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }

    /// Proposed content, if supplied.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Whether an active intent covers the request.
    #[must_use]
    pub fn intent_active(&self) -> bool {
        self.intent_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = PolicyConfig::from_json_str(r#"{"l3PathTriggers": ["vault"]}"#).unwrap();
        assert_eq!(config.l3_path_triggers, ["vault"]);
        assert_eq!(config.l2_path_triggers, PolicyConfig::default().l2_path_triggers);
    }

    #[test]
    fn blank_triggers_are_rejected() {
        let err = PolicyConfig::from_json_str(r#"{"l2PathTriggers": ["api", " "]}"#).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule(_)));
    }

    #[tokio::test]
    async fn invalid_or_missing_files_fall_back_to_defaults() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("policy-{}", uuid::Uuid::new_v4()));
        assert_eq!(
            PolicyConfig::load_overrides(Some(&dir)).await,
            PolicyConfig::default()
        );

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(OVERRIDES_FILE), "{ nope").unwrap();
        assert_eq!(
            PolicyConfig::load_overrides(Some(&dir)).await,
            PolicyConfig::default()
        );

        std::fs::write(dir.join(OVERRIDES_FILE), r#"{"l2ContentTriggers": ["grpc"]}"#).unwrap();
        let loaded = PolicyConfig::load_overrides(Some(&dir)).await;
        assert_eq!(loaded.l2_content_triggers, ["grpc"]);

        let _ = std::fs::remove_dir_all(dir);
    }
}
