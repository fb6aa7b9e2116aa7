//! Single-use replay-protection nonces.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use tracing::debug;

/// Default lifetime of an issued nonce.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(300);

/// Outcome of presenting a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceCheck {
    /// First use of a live nonce; it is now consumed.
    Accepted,
    /// The nonce was already consumed.
    Reused,
    /// The nonce was never issued, or expired and was swept.
    Unknown,
    /// The nonce was issued but its lifetime ran out.
    Expired,
}

impl NonceCheck {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Human readable reason for a rejection.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Accepted => "nonce accepted",
            Self::Reused => "nonce reuse detected",
            Self::Unknown => "unknown nonce",
            Self::Expired => "nonce expired",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    expires_at: DateTime<Utc>,
    consumed: bool,
}

/// Issues nonces and accepts each exactly once within its lifetime.
///
/// Consumed nonces are remembered until they expire so that reuse is reported
/// as such; after [`NonceStore::sweep`] they read as unknown, which is
/// rejected all the same.
#[derive(Debug)]
pub struct NonceStore {
    ttl: chrono::Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL)
    }
}

impl NonceStore {
    /// Store whose nonces live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Issues a fresh 128-bit nonce.
    pub fn issue(&self) -> String {
        self.issue_at(Utc::now())
    }

    fn issue_at(&self, now: DateTime<Utc>) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);
        let slot = Slot {
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            consumed: false,
        };
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(nonce.clone(), slot);
        nonce
    }

    /// Presents `nonce`, consuming it on first valid use.
    pub fn consume(&self, nonce: &str) -> NonceCheck {
        self.consume_at(nonce, Utc::now())
    }

    fn consume_at(&self, nonce: &str, now: DateTime<Utc>) -> NonceCheck {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let check = match slots.get_mut(nonce) {
            None => NonceCheck::Unknown,
            Some(slot) if slot.consumed => NonceCheck::Reused,
            Some(slot) if now > slot.expires_at => NonceCheck::Expired,
            Some(slot) => {
                slot.consumed = true;
                NonceCheck::Accepted
            }
        };
        debug!(?check, "nonce presented");
        check
    }

    /// Issues and immediately consumes a nonce for requests that carried none.
    pub fn resolve(&self) -> String {
        let nonce = self.issue();
        self.consume(&nonce);
        nonce
    }

    /// Drops expired nonces, returning how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| slot.expires_at >= now);
        before - slots.len()
    }

    /// Number of tracked nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no nonces are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonces_are_single_use() {
        let store = NonceStore::default();
        let nonce = store.issue();
        assert_eq!(nonce.len(), 32);
        assert_eq!(store.consume(&nonce), NonceCheck::Accepted);
        assert_eq!(store.consume(&nonce), NonceCheck::Reused);
        assert_eq!(store.consume("feedface"), NonceCheck::Unknown);
    }

    #[test]
    fn expiry_and_sweep() {
        let store = NonceStore::new(Duration::from_secs(60));
        let now = Utc::now();
        let nonce = store.issue_at(now);
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(store.consume_at(&nonce, later), NonceCheck::Expired);

        assert_eq!(store.sweep(later), 1);
        assert!(store.is_empty());
        assert_eq!(store.consume_at(&nonce, later), NonceCheck::Unknown);
    }

    #[test]
    fn resolved_nonces_cannot_be_replayed() {
        let store = NonceStore::default();
        let nonce = store.resolve();
        assert_eq!(store.consume(&nonce), NonceCheck::Reused);
        assert!(!NonceCheck::Reused.is_accepted());
    }
}
