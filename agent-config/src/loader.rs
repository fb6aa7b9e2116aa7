//! Configuration provider seam.

use std::sync::{PoisonError, RwLock};

use agent_primitives::OperationalMode;

use crate::schema::GovernanceConfig;

/// Supplies the current configuration to core components.
///
/// Implementations are expected to be cheap to call; components read the
/// configuration when they need it instead of caching it.
pub trait ConfigProvider: Send + Sync {
    /// Returns a snapshot of the current configuration.
    fn config(&self) -> GovernanceConfig;
}

/// Provider backed by an in-process value that hosts may update at runtime.
#[derive(Debug, Default)]
pub struct StaticConfigProvider {
    config: RwLock<GovernanceConfig>,
}

impl StaticConfigProvider {
    /// Wraps the supplied configuration.
    #[must_use]
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replaces the configuration wholesale.
    pub fn replace(&self, config: GovernanceConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Switches the operational mode in place.
    pub fn set_operational_mode(&self, mode: OperationalMode) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .operational_mode = mode;
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn config(&self) -> GovernanceConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reflects_updates() {
        let provider = StaticConfigProvider::new(GovernanceConfig::for_workspace("/ws"));
        assert_eq!(provider.config().operational_mode, OperationalMode::Normal);

        provider.set_operational_mode(OperationalMode::Surge);
        assert_eq!(provider.config().operational_mode, OperationalMode::Surge);

        provider.replace(GovernanceConfig::default());
        assert_eq!(provider.config().workspace_root, std::path::PathBuf::from("."));
    }
}
