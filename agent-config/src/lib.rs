//! Configuration and persistence collaborators for the governance core.
//!
//! The core never reads editor settings or YAML directly; it consumes the
//! traits exposed here, which hosts implement or satisfy with the bundled
//! in-memory and file-backed stores.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;
pub mod secrets;
pub mod state;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigProvider, StaticConfigProvider};
pub use schema::{GovernanceConfig, LlmSettings};
pub use secrets::{FileSecretStore, InMemorySecretStore, SecretStore};
pub use state::{InMemoryStateStore, JsonFileStateStore, StateStore};
