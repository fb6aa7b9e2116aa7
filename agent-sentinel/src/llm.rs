//! Optional LLM review of a change, gated on reachability and the endpoint
//! allow-list.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use agent_adapters::{EndpointGuard, OllamaConfig, OllamaModel, ReviewModel, ReviewPrompt};
use agent_config::LlmSettings;
use agent_primitives::Severity;
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::heuristic::HeuristicReport;

/// Deadline for one generation.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a probe result is trusted.
pub const AVAILABILITY_TTL: Duration = Duration::from_secs(60);
/// Characters of content included in the prompt.
pub const PROMPT_CONTENT_CHARS: usize = 8_000;

const CONFIDENCE_AGREEING: f64 = 0.8;
const CONFIDENCE_MIXED: f64 = 0.5;
const TOKEN_BONUS: f64 = 0.1;
const SHORT_RESPONSE_PENALTY: f64 = 0.2;
const SHORT_RESPONSE_CHARS: usize = 10;
const CONFIDENCE_FLOOR: f64 = 0.3;
const CONFIDENCE_CEILING: f64 = 0.9;

const SYSTEM_PROMPT: &str = "You review changes written by autonomous coding agents. \
Reply with one of ALLOW, DENY or ESCALATE on the first line, then a one sentence reason. \
DENY unsafe code, ESCALATE anything a human must see, ALLOW everything else.";

static DECISION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(ALLOW|DENY|ESCALATE)\b").expect("decision token regex is valid"));

/// Structured decision found in a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LlmDecision {
    /// The model saw no problem.
    Allow,
    /// The model wants the change blocked.
    Deny,
    /// The model wants a human to decide.
    Escalate,
}

/// Extracts the first structured decision token from `response`.
#[must_use]
pub fn parse_decision(response: &str) -> Option<LlmDecision> {
    DECISION_TOKEN
        .captures(response)
        .and_then(|caps| match &caps[1] {
            "ALLOW" => Some(LlmDecision::Allow),
            "DENY" => Some(LlmDecision::Deny),
            "ESCALATE" => Some(LlmDecision::Escalate),
            _ => None,
        })
}

/// Confidence of an LLM-informed verdict.
///
/// Starts at 0.8 when every matched heuristic shares one severity, 0.5
/// otherwise; adds 0.1 for a structured decision token; subtracts 0.2 for a
/// response shorter than ten characters; clamps to `[0.3, 0.9]`.
#[must_use]
pub fn llm_confidence(severities: &[Severity], response: &str) -> f64 {
    let agreeing = severities.windows(2).all(|pair| pair[0] == pair[1]);
    let mut confidence = if agreeing {
        CONFIDENCE_AGREEING
    } else {
        CONFIDENCE_MIXED
    };
    if parse_decision(response).is_some() {
        confidence += TOKEN_BONUS;
    }
    if response.trim().chars().count() < SHORT_RESPONSE_CHARS {
        confidence -= SHORT_RESPONSE_PENALTY;
    }
    confidence.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING)
}

/// Outcome of asking the model.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutcome {
    /// The model answered.
    Answered {
        /// Raw response text.
        response: String,
        /// Parsed decision token.
        decision: Option<LlmDecision>,
        /// Confidence derived from the response and heuristics.
        confidence: f64,
    },
    /// The model could not be consulted.
    Unavailable {
        /// Why.
        reason: String,
    },
}

enum Backend {
    Ready(Arc<dyn ReviewModel>),
    Unavailable { reason: String },
}

/// LLM evaluator with cached reachability.
pub struct LlmEvaluator {
    backend: Backend,
    generation_timeout: Duration,
    availability: Mutex<Option<(bool, Instant)>>,
}

impl std::fmt::Debug for LlmEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Ready(model) => model.info().provider.to_owned(),
            Backend::Unavailable { reason } => format!("unavailable: {reason}"),
        };
        f.debug_struct("LlmEvaluator")
            .field("backend", &backend)
            .finish_non_exhaustive()
    }
}

impl LlmEvaluator {
    /// Consults `model`.
    #[must_use]
    pub fn new(model: Arc<dyn ReviewModel>) -> Self {
        Self {
            backend: Backend::Ready(model),
            generation_timeout: GENERATION_TIMEOUT,
            availability: Mutex::new(None),
        }
    }

    /// An evaluator that never consults a model.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: Backend::Unavailable {
                reason: reason.into(),
            },
            generation_timeout: GENERATION_TIMEOUT,
            availability: Mutex::new(None),
        }
    }

    /// Builds a local Ollama evaluator from settings.
    ///
    /// Disabled settings, a malformed endpoint, or one refused by the allow-list
    /// yield an unavailable evaluator.
    #[must_use]
    pub fn from_settings(settings: &LlmSettings) -> Self {
        if !settings.enabled {
            return Self::unavailable("LLM evaluation disabled");
        }
        let guard = EndpointGuard::new(&settings.allowed_hosts);
        let model = OllamaConfig::new(settings.model.clone())
            .with_endpoint(&settings.endpoint)
            .map(|config| config.with_generation_timeout(GENERATION_TIMEOUT))
            .and_then(|config| OllamaModel::connect(config, &guard));
        match model {
            Ok(model) => {
                info!(endpoint = %settings.endpoint, model = %settings.model, "LLM evaluator configured");
                Self::new(Arc::new(model))
            }
            Err(err) => {
                warn!(endpoint = %settings.endpoint, error = %err, "LLM evaluator unavailable");
                Self::unavailable(err.to_string())
            }
        }
    }

    /// Overrides the generation deadline.
    #[must_use]
    pub fn with_generation_timeout(mut self, deadline: Duration) -> Self {
        self.generation_timeout = deadline;
        self
    }

    /// Whether the model endpoint is currently reachable. Probe results are
    /// cached for [`AVAILABILITY_TTL`].
    pub async fn is_available(&self) -> bool {
        let Backend::Ready(model) = &self.backend else {
            return false;
        };
        let mut cached = self.availability.lock().await;
        if let Some((available, checked_at)) = *cached {
            if checked_at.elapsed() < AVAILABILITY_TTL {
                return available;
            }
        }
        let available = model.probe().await;
        debug!(available, "LLM availability probed");
        *cached = Some((available, Instant::now()));
        available
    }

    /// Forgets the cached probe result.
    pub async fn invalidate(&self) {
        *self.availability.lock().await = None;
    }

    /// Asks the model to review `content`.
    pub async fn evaluate(&self, path: &str, content: &str, report: &HeuristicReport) -> LlmOutcome {
        let model = match &self.backend {
            Backend::Ready(model) => model,
            Backend::Unavailable { reason } => {
                return LlmOutcome::Unavailable {
                    reason: reason.clone(),
                };
            }
        };
        if !self.is_available().await {
            return LlmOutcome::Unavailable {
                reason: "model endpoint unreachable".to_owned(),
            };
        }

        let prompt = match build_prompt(path, content, report) {
            Ok(prompt) => prompt,
            Err(err) => {
                return LlmOutcome::Unavailable {
                    reason: err.to_string(),
                };
            }
        };
        let response = match timeout(self.generation_timeout, model.complete(prompt)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(path, error = %err, "LLM evaluation failed");
                self.invalidate().await;
                return LlmOutcome::Unavailable {
                    reason: err.to_string(),
                };
            }
            Err(_) => {
                warn!(path, "LLM evaluation timed out");
                self.invalidate().await;
                return LlmOutcome::Unavailable {
                    reason: format!(
                        "generation exceeded {} ms",
                        self.generation_timeout.as_millis()
                    ),
                };
            }
        };

        LlmOutcome::Answered {
            decision: parse_decision(&response),
            confidence: llm_confidence(&report.severities(), &response),
            response,
        }
    }
}

fn build_prompt(
    path: &str,
    content: &str,
    report: &HeuristicReport,
) -> agent_adapters::AdapterResult<ReviewPrompt> {
    let excerpt: String = content.chars().take(PROMPT_CONTENT_CHARS).collect();
    let flags = if report.findings.is_empty() {
        "none".to_owned()
    } else {
        report
            .findings
            .iter()
            .map(|finding| format!("{} ({})", finding.pattern_id, finding.severity))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let prompt = format!(
        "File: {path}\nHeuristic flags: {flags}\nComplexity: {}\n\n{excerpt}",
        report.complexity
    );
    Ok(ReviewPrompt::new(prompt)?
        .with_system(SYSTEM_PROMPT)
        .with_temperature(0.0)
        .with_max_tokens(128))
}
