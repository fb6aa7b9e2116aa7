//! Hash chaining, signing, and chain audit reports.

use std::fmt;

use agent_config::SecretStore;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::entry::Payload;
use crate::{LedgerError, LedgerResult};

type HmacSha256 = Hmac<Sha256>;

/// Secret store key under which the ledger signing key is kept.
pub const SIGNING_KEY_SECRET: &str = "governance.ledger.hmac_key";

const SIGNING_KEY_LEN: usize = 32;

/// Returns the lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serializes a JSON value with object keys sorted at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Computes `entryHash` from the hashed fields of an entry.
#[must_use]
pub fn compute_entry_hash(
    timestamp: &str,
    event_type: &str,
    agent_did: &str,
    payload: &Payload,
    prev_hash: &str,
) -> String {
    let canonical = canonical_json(&json!({
        "timestamp": timestamp,
        "eventType": event_type,
        "agentDid": agent_did,
        "payload": payload,
        "prevHash": prev_hash,
    }));
    sha256_hex(canonical.as_bytes())
}

/// Columns covered by the signature in addition to `entryHash`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignedColumns<'a> {
    pub id: i64,
    pub entry_hash: &'a str,
    pub agent_trust_at_action: Option<f64>,
    pub artifact_path: Option<&'a str>,
    pub artifact_hash: Option<&'a str>,
    pub risk_grade: Option<&'a str>,
    pub overseer_did: Option<&'a str>,
    pub overseer_decision: Option<&'a str>,
}

impl SignedColumns<'_> {
    fn material(&self) -> LedgerResult<String> {
        Ok(canonical_json(&serde_json::to_value(self)?))
    }
}

/// HMAC-SHA256 key used to sign entries. Never printed.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    /// Wraps raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::KeyMaterial`] when the key is shorter than 256 bits.
    pub fn from_bytes(bytes: Vec<u8>) -> LedgerResult<Self> {
        if bytes.len() < SIGNING_KEY_LEN {
            return Err(LedgerError::KeyMaterial(format!(
                "expected at least {SIGNING_KEY_LEN} bytes"
            )));
        }
        Ok(Self(bytes))
    }

    /// Generates a fresh random 256-bit key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0_u8; SIGNING_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Loads the key from `secrets`, generating and storing one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Secret`] when the store fails and
    /// [`LedgerError::KeyMaterial`] when the stored value is not valid hex.
    pub async fn load_or_create(secrets: &dyn SecretStore) -> LedgerResult<Self> {
        if let Some(stored) = secrets.get(SIGNING_KEY_SECRET).await? {
            let bytes = hex::decode(stored.trim())
                .map_err(|_| LedgerError::KeyMaterial("stored key is not hex".into()))?;
            return Self::from_bytes(bytes);
        }

        let key = Self::generate();
        secrets
            .store(SIGNING_KEY_SECRET, &hex::encode(&key.0))
            .await?;
        tracing::info!("generated new ledger signing key");
        Ok(key)
    }

    fn mac(&self, material: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(material.as_bytes());
        mac
    }

    pub(crate) fn sign(&self, columns: &SignedColumns<'_>) -> LedgerResult<String> {
        let material = columns.material()?;
        Ok(hex::encode(self.mac(&material).finalize().into_bytes()))
    }

    pub(crate) fn verify(&self, columns: &SignedColumns<'_>, signature: &str) -> bool {
        let Ok(material) = columns.material() else {
            return false;
        };
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let expected = self.mac(&material).finalize().into_bytes();
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }
}

/// Why chain verification stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFailureKind {
    /// Recomputed `entryHash` differs from the stored one.
    HashMismatch,
    /// Signature does not match the entry.
    SignatureMismatch,
    /// `prevHash` does not equal the preceding entry's hash.
    BrokenLink,
    /// The row could not be decoded.
    Malformed,
    /// The ledger runs without a backing store.
    Unavailable,
}

/// First integrity failure found while walking the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainFailure {
    /// Offending row id; `0` when the ledger is unavailable.
    pub entry_id: i64,
    /// Kind of failure.
    pub kind: ChainFailureKind,
}

/// Outcome of walking the whole chain in insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Entries that passed every check before the walk stopped.
    pub entries_checked: usize,
    /// First failure, if any.
    pub failure: Option<ChainFailure>,
}

impl ChainReport {
    /// Whether every entry verified.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "m": [ {"y": 1, "x": 2} ]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn entry_hash_depends_on_every_hashed_field() {
        let mut payload = Payload::new();
        payload.insert("k".into(), json!("v"));
        let base = compute_entry_hash("t", "SYSTEM_EVENT", "did:a", &payload, "p");

        assert_eq!(
            base,
            compute_entry_hash("t", "SYSTEM_EVENT", "did:a", &payload, "p")
        );
        assert_ne!(
            base,
            compute_entry_hash("t2", "SYSTEM_EVENT", "did:a", &payload, "p")
        );
        assert_ne!(
            base,
            compute_entry_hash("t", "TRUST_UPDATE", "did:a", &payload, "p")
        );
        assert_ne!(
            base,
            compute_entry_hash("t", "SYSTEM_EVENT", "did:a", &payload, "q")
        );
    }

    #[test]
    fn signatures_verify_and_detect_changes() {
        let key = SigningKey::generate();
        let columns = SignedColumns {
            id: 1,
            entry_hash: "abc",
            agent_trust_at_action: Some(0.35),
            artifact_path: Some("src/main.rs"),
            artifact_hash: None,
            risk_grade: Some("L2"),
            overseer_did: None,
            overseer_decision: None,
        };
        let signature = key.sign(&columns).unwrap();
        assert!(key.verify(&columns, &signature));

        let tampered = SignedColumns {
            risk_grade: Some("L1"),
            ..columns
        };
        assert!(!key.verify(&tampered, &signature));
        assert!(!key.verify(&tampered, "not-hex"));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(matches!(
            SigningKey::from_bytes(vec![1, 2, 3]),
            Err(LedgerError::KeyMaterial(_))
        ));
    }

    #[test]
    fn debug_output_hides_key() {
        let key = SigningKey::generate();
        assert_eq!(format!("{key:?}"), "SigningKey(..)");
    }
}
