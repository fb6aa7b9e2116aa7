//! Review models consulted by the verdict arbiter.
//!
//! [`ReviewModel`] is the seam; [`OllamaModel`] talks to a local daemon and
//! [`ScriptedModel`] answers from a script. Endpoints pass through
//! [`EndpointGuard`] before any connection is made.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod guard;
mod http_client;
pub mod ollama;
pub mod review;
pub mod scripted;

pub use error::{AdapterError, AdapterResult};
pub use guard::EndpointGuard;
pub use ollama::{OllamaConfig, OllamaModel};
pub use review::{MAX_RESPONSE_TOKENS, ModelInfo, ReviewModel, ReviewPrompt, ReviewStream};
pub use scripted::ScriptedModel;
