//! The review-model interface the arbiter consults.
//!
//! A review is a single prompt, optionally framed by a system instruction,
//! answered as a stream of text fragments. Most callers only need
//! [`ReviewModel::complete`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::{AdapterError, AdapterResult};

/// Upper bound on requested output tokens.
pub const MAX_RESPONSE_TOKENS: u32 = 4096;

/// Identifies the provider and model behind an adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Provider tag such as `ollama`.
    pub provider: &'static str,
    /// Model name as the provider knows it.
    pub model: String,
}

impl ModelInfo {
    /// Describes `model` served by `provider`.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

/// One review question put to a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ReviewPrompt {
    prompt: String,
    system: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ReviewPrompt {
    /// Wraps `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidPrompt`] when the prompt is blank.
    pub fn new(prompt: impl Into<String>) -> AdapterResult<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(AdapterError::InvalidPrompt("prompt is empty".into()));
        }
        Ok(Self {
            prompt,
            system: None,
            temperature: None,
            max_tokens: None,
        })
    }

    /// Frames the prompt with a system instruction.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sampling temperature, clamped to `0.0..=2.0`.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Caps the response length, at most [`MAX_RESPONSE_TOKENS`].
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens.clamp(1, MAX_RESPONSE_TOKENS));
        self
    }

    /// The question put to the model.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// System instruction, if any.
    #[must_use]
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Requested sampling temperature.
    #[must_use]
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Requested response cap.
    #[must_use]
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }
}

/// Text streamed back by a model; the stream ends after the final fragment.
pub type ReviewStream = Pin<Box<dyn Stream<Item = AdapterResult<String>> + Send>>;

/// A model able to answer review prompts.
#[async_trait]
pub trait ReviewModel: Send + Sync {
    /// Provider and model name, used in verdict summaries.
    fn info(&self) -> &ModelInfo;

    /// Cheap reachability check; never errors.
    async fn probe(&self) -> bool;

    /// Starts answering `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] if the model cannot be reached or refuses
    /// the prompt.
    async fn review(&self, prompt: ReviewPrompt) -> AdapterResult<ReviewStream>;

    /// Answers `prompt` and joins the streamed fragments.
    ///
    /// # Errors
    ///
    /// Propagates the first error from [`ReviewModel::review`] or the stream.
    async fn complete(&self, prompt: ReviewPrompt) -> AdapterResult<String> {
        let mut stream = self.review(prompt).await?;
        let mut answer = String::new();
        while let Some(fragment) = stream.next().await {
            answer.push_str(&fragment?);
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    struct Echo(ModelInfo);

    #[async_trait]
    impl ReviewModel for Echo {
        fn info(&self) -> &ModelInfo {
            &self.0
        }

        async fn probe(&self) -> bool {
            true
        }

        async fn review(&self, prompt: ReviewPrompt) -> AdapterResult<ReviewStream> {
            let words: Vec<AdapterResult<String>> = prompt
                .prompt()
                .split_inclusive(' ')
                .map(|word| Ok(word.to_owned()))
                .collect();
            Ok(Box::pin(stream::iter(words)))
        }
    }

    #[test]
    fn blank_prompts_are_refused() {
        assert!(matches!(
            ReviewPrompt::new("  \n"),
            Err(AdapterError::InvalidPrompt(_))
        ));
    }

    #[test]
    fn sampling_settings_are_clamped() {
        let prompt = ReviewPrompt::new("review this")
            .unwrap()
            .with_temperature(7.5)
            .with_max_tokens(100_000);
        assert_eq!(prompt.temperature(), Some(2.0));
        assert_eq!(prompt.max_tokens(), Some(MAX_RESPONSE_TOKENS));
        assert_eq!(prompt.system(), None);
    }

    #[tokio::test]
    async fn complete_joins_fragments() {
        let model = Echo(ModelInfo::new("echo", "words"));
        let answer = model
            .complete(ReviewPrompt::new("ALLOW looks fine").unwrap())
            .await
            .unwrap();
        assert_eq!(answer, "ALLOW looks fine");
        assert_eq!(model.info().provider, "echo");
    }
}
