//! A review model that answers from a script, for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream;

use crate::error::{AdapterError, AdapterResult};
use crate::review::{ModelInfo, ReviewModel, ReviewPrompt, ReviewStream};

/// Replays queued answers in order, then repeats a fallback answer.
#[derive(Debug)]
pub struct ScriptedModel {
    info: ModelInfo,
    reachable: AtomicBool,
    script: Mutex<VecDeque<AdapterResult<String>>>,
    fallback: String,
    reviews: AtomicUsize,
    prompts: Mutex<Vec<ReviewPrompt>>,
}

impl ScriptedModel {
    /// A reachable model whose answer is always `fallback` unless scripted.
    #[must_use]
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            info: ModelInfo::new("scripted", "script"),
            reachable: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            reviews: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues an answer.
    #[must_use]
    pub fn then_respond(self, answer: impl Into<String>) -> Self {
        self.push(Ok(answer.into()));
        self
    }

    /// Queues a connection failure.
    #[must_use]
    pub fn then_fail(self, reason: impl Into<String>) -> Self {
        self.push(Err(AdapterError::unreachable(reason)));
        self
    }

    fn push(&self, entry: AdapterResult<String>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(entry);
    }

    /// Sets what [`ReviewModel::probe`] reports.
    pub fn set_available(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Reviews served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.reviews.load(Ordering::SeqCst)
    }

    /// Prompts received, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<ReviewPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReviewModel for ScriptedModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn probe(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn review(&self, prompt: ReviewPrompt) -> AdapterResult<ReviewStream> {
        self.reviews.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt);
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let answer = next.unwrap_or_else(|| Ok(self.fallback.clone()))?;
        Ok(Box::pin(stream::once(async move { Ok::<_, AdapterError>(answer) })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(text: &str) -> ReviewPrompt {
        ReviewPrompt::new(text).unwrap()
    }

    #[tokio::test]
    async fn script_runs_before_fallback() {
        let model = ScriptedModel::new("ALLOW")
            .then_respond("DENY: leaked key")
            .then_fail("connection reset");

        assert_eq!(model.complete(prompt("one")).await.unwrap(), "DENY: leaked key");
        let err = model.complete(prompt("two")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(model.complete(prompt("three")).await.unwrap(), "ALLOW");
        assert_eq!(model.calls(), 3);
        let seen: Vec<_> = model.prompts().iter().map(|p| p.prompt().to_owned()).collect();
        assert_eq!(seen, ["one", "two", "three"]);

        assert!(model.probe().await);
        model.set_available(false);
        assert!(!model.probe().await);
    }
}
