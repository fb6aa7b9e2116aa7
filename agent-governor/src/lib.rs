//! Local governance engine for AI coding agents.
//!
//! Depend on this crate via `cargo add agent-governor`. It bundles the
//! component crates behind feature flags and, with the `runtime` feature,
//! offers [`Governor`] to wire them together from a
//! [`GovernanceConfig`](agent_config::GovernanceConfig).

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use agent_primitives as primitives;

/// Configuration, secrets and state stores (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

/// Tracing setup and the governance event bus (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Hash-chained audit ledger (enabled by `ledger` feature).
#[cfg(feature = "ledger")]
pub use agent_ledger as ledger;

/// Agent trust scoring (enabled by `trust` feature).
#[cfg(feature = "trust")]
pub use agent_trust as trust;

/// Risk classification (enabled by `policy` feature).
#[cfg(feature = "policy")]
pub use agent_policy as policy;

/// Model adapters (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use agent_adapters as adapters;

/// Verdict arbitration and routing (enabled by `sentinel` feature).
#[cfg(feature = "sentinel")]
pub use agent_sentinel as sentinel;

/// Approvals, preflight, overrides and replay (enabled by `governance` feature).
#[cfg(feature = "governance")]
pub use agent_governance as governance;

#[cfg(feature = "runtime")]
mod runtime;

#[cfg(feature = "runtime")]
pub use runtime::{Governor, GovernorBuilder};
