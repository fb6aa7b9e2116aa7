//! Tamper-evident governance ledger.
//!
//! Every entry is hashed over its timestamp, event type, agent, payload and
//! predecessor hash, then signed with an HMAC-SHA256 key held in the host's
//! secret store. [`Ledger::verify_chain`] walks the table in insertion order
//! and fails closed on the first mismatch.

#![warn(missing_docs, clippy::pedantic)]

mod chain;
mod entry;
mod error;
mod ledger;
mod store;

pub use chain::{
    ChainFailure, ChainFailureKind, ChainReport, SIGNING_KEY_SECRET, SigningKey, canonical_json,
    compute_entry_hash, sha256_hex,
};
pub use entry::{AppendRequest, GENESIS_HASH, LedgerEntry, Payload, STUB_HASH};
pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use store::{LedgerStore, format_timestamp};
