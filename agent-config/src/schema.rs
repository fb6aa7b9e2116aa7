//! Strongly typed configuration schema.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_primitives::{ArbiterMode, GovernanceMode, OperationalMode};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

const DEFAULT_LEDGER_PATH: &str = ".failsafe/ledger/soa_ledger.db";
const DEFAULT_STATE_PATH: &str = ".failsafe/state/governance_state.json";
const DEFAULT_L3_SLA_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_NONCE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:11434/";
const DEFAULT_LLM_MODEL: &str = "llama3.2";

/// Settings for the optional local LLM evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Whether the arbiter may consult an LLM at all.
    pub enabled: bool,
    /// Base URL of the model endpoint.
    pub endpoint: String,
    /// Model identifier requested from the endpoint.
    pub model: String,
    /// Hosts allowed in addition to loopback addresses.
    pub allowed_hosts: Vec<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_LLM_ENDPOINT.to_owned(),
            model: DEFAULT_LLM_MODEL.to_owned(),
            allowed_hosts: Vec::new(),
        }
    }
}

/// Configuration consumed by the governance core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Root directory of the supervised workspace.
    pub workspace_root: PathBuf,
    /// Ledger database path, relative to the workspace root unless absolute.
    pub ledger_path: PathBuf,
    /// Key-value state file, relative to the workspace root unless absolute.
    pub state_path: PathBuf,
    /// SLA for L3 approvals, in seconds.
    pub l3_sla_seconds: u64,
    /// Load-shedding mode applied to verification sampling.
    pub operational_mode: OperationalMode,
    /// When the arbiter consults the LLM.
    pub arbiter_mode: ArbiterMode,
    /// Governance posture in effect when no override is active.
    pub governance_mode: GovernanceMode,
    /// Directory holding JSON policy overrides.
    pub policy_dir: Option<PathBuf>,
    /// Lifetime of an issued, unconsumed nonce, in seconds.
    pub nonce_ttl_seconds: u64,
    /// LLM evaluator settings.
    pub llm: LlmSettings,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            l3_sla_seconds: DEFAULT_L3_SLA_SECONDS,
            operational_mode: OperationalMode::default(),
            arbiter_mode: ArbiterMode::default(),
            governance_mode: GovernanceMode::default(),
            policy_dir: None,
            nonce_ttl_seconds: DEFAULT_NONCE_TTL_SECONDS,
            llm: LlmSettings::default(),
        }
    }
}

impl GovernanceConfig {
    /// Creates a default configuration rooted at `workspace_root`.
    #[must_use]
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Self::default()
        }
    }

    /// Reads a JSON configuration file; absent keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, is not valid JSON,
    /// or fails [`validate`](Self::validate).
    pub async fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let data = tokio::fs::read(path.as_ref()).await?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a duration is zero or the LLM
    /// endpoint is missing while the LLM is enabled.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.l3_sla_seconds == 0 {
            return Err(ConfigError::Invalid(
                "l3_sla_seconds must be greater than zero".into(),
            ));
        }
        if self.nonce_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "nonce_ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.llm.enabled && self.llm.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "llm.endpoint is required when the llm is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the ledger path against the workspace root.
    #[must_use]
    pub fn resolved_ledger_path(&self) -> PathBuf {
        self.resolve(&self.ledger_path)
    }

    /// Resolves the state file path against the workspace root.
    #[must_use]
    pub fn resolved_state_path(&self) -> PathBuf {
        self.resolve(&self.state_path)
    }

    /// SLA for L3 approvals.
    #[must_use]
    pub fn l3_sla(&self) -> Duration {
        Duration::from_secs(self.l3_sla_seconds)
    }

    /// Nonce lifetime.
    #[must_use]
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_seconds)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_takes_defaults() {
        let config: GovernanceConfig =
            serde_json::from_str(r#"{"workspace_root": "/ws", "arbiter_mode": "hybrid"}"#).unwrap();

        assert_eq!(config.arbiter_mode, ArbiterMode::Hybrid);
        assert_eq!(config.l3_sla_seconds, DEFAULT_L3_SLA_SECONDS);
        assert_eq!(
            config.resolved_ledger_path(),
            PathBuf::from("/ws").join(DEFAULT_LEDGER_PATH)
        );
        assert!(!config.llm.enabled);
    }

    #[test]
    fn validate_rejects_zero_sla() {
        let config = GovernanceConfig {
            l3_sla_seconds: 0,
            ..GovernanceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn loads_from_json_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("governance-config-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, br#"{"l3_sla_seconds": 60, "operational_mode": "safe"}"#)
            .await
            .unwrap();

        let config = GovernanceConfig::from_json_file(&path).await.unwrap();
        assert_eq!(config.l3_sla(), Duration::from_secs(60));
        assert_eq!(config.operational_mode, OperationalMode::Safe);

        let _ = std::fs::remove_file(path);
    }
}
