//! Registry of active intents.
//!
//! An intent is a sealed statement of what an agent is about to do; changes it
//! covers may proceed without per-change approval.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;

/// Tracks which intents are currently active.
#[derive(Debug, Default)]
pub struct IntentRegistry {
    active: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl IntentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `intent_id` as active.
    pub fn activate(&self, intent_id: impl Into<String>) {
        let intent_id = intent_id.into();
        info!(intent = %intent_id, "intent activated");
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(intent_id, Utc::now());
    }

    /// Closes `intent_id`, returning whether it was active.
    pub fn complete(&self, intent_id: &str) -> bool {
        let removed = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(intent_id)
            .is_some();
        if removed {
            info!(intent = intent_id, "intent completed");
        }
        removed
    }

    /// Whether `intent_id` is active.
    #[must_use]
    pub fn is_active(&self, intent_id: &str) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(intent_id)
    }

    /// When `intent_id` was activated.
    #[must_use]
    pub fn activated_at(&self, intent_id: &str) -> Option<DateTime<Utc>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(intent_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let registry = IntentRegistry::new();
        assert!(!registry.is_active("intent-1"));
        registry.activate("intent-1");
        assert!(registry.is_active("intent-1"));
        assert!(registry.activated_at("intent-1").is_some());
        assert!(registry.complete("intent-1"));
        assert!(!registry.complete("intent-1"));
    }
}
