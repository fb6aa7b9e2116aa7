//! Observability utilities for the governance core.
//!
//! [`events`] carries the typed notifications the core emits for hosts to
//! render; [`tracing_support`] installs the structured log subscriber.

#![warn(missing_docs, clippy::pedantic)]

pub mod events;
pub mod tracing_support;

pub use events::{
    BroadcastEventBus, CollectingEventBus, EventBus, GovernanceEvent, TracingEventBus,
};
