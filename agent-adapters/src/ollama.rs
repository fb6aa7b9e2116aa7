//! Review model served by a local `Ollama` daemon through `/api/generate`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use hyper::body::to_bytes;
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Body, Method, Request, Uri};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};
use crate::guard::EndpointGuard;
use crate::http_client::{ModelClient, model_client};
use crate::review::{ModelInfo, ReviewModel, ReviewPrompt, ReviewStream};

/// Where `ollama serve` listens by default.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";
/// Deadline for the `/api/tags` reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for one generation.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint, model and deadlines for an [`OllamaModel`].
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    endpoint: String,
    model: String,
    generation_timeout: Duration,
    probe_timeout: Duration,
}

impl OllamaConfig {
    /// Targets `model` on the default local endpoint.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            model: model.into(),
            generation_timeout: GENERATION_TIMEOUT,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    /// Points at another daemon.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] unless `endpoint` is an
    /// absolute `http` or `https` URL.
    pub fn with_endpoint(mut self, endpoint: &str) -> AdapterResult<Self> {
        self.endpoint = normalize_endpoint(endpoint)?;
        Ok(self)
    }

    /// Deadline for one generation.
    #[must_use]
    pub fn with_generation_timeout(mut self, deadline: Duration) -> Self {
        self.generation_timeout = deadline;
        self
    }

    /// Deadline for the reachability probe and for connecting.
    #[must_use]
    pub fn with_probe_timeout(mut self, deadline: Duration) -> Self {
        self.probe_timeout = deadline;
        self
    }

    /// Endpoint without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// [`ReviewModel`] backed by `Ollama`.
pub struct OllamaModel {
    info: ModelInfo,
    client: ModelClient,
    generate_uri: Uri,
    tags_uri: Uri,
    generation_timeout: Duration,
    probe_timeout: Duration,
}

impl fmt::Debug for OllamaModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaModel")
            .field("model", &self.info.model)
            .field("generate_uri", &self.generate_uri)
            .finish_non_exhaustive()
    }
}

impl OllamaModel {
    /// Connects to the configured daemon once `guard` accepts its endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::EndpointBlocked`] when the guard refuses the
    /// host and [`AdapterError::Configuration`] for unusable URLs or an empty
    /// model name.
    pub fn connect(config: OllamaConfig, guard: &EndpointGuard) -> AdapterResult<Self> {
        if config.model.trim().is_empty() {
            return Err(AdapterError::configuration("model name is empty"));
        }
        guard.check(&config.endpoint)?;
        let generate_uri = join(&config.endpoint, "/api/generate")?;
        let tags_uri = join(&config.endpoint, "/api/tags")?;
        Ok(Self {
            client: model_client(config.probe_timeout),
            info: ModelInfo::new("ollama", config.model),
            generate_uri,
            tags_uri,
            generation_timeout: config.generation_timeout,
            probe_timeout: config.probe_timeout,
        })
    }

    fn generate_body(&self, prompt: &ReviewPrompt) -> GenerateBody<'_> {
        GenerateBody {
            model: &self.info.model,
            prompt: prompt.prompt().to_owned(),
            system: prompt.system().map(str::to_owned),
            stream: false,
            options: SamplingOptions {
                temperature: prompt.temperature(),
                num_predict: prompt.max_tokens(),
            },
        }
    }

    async fn post_generate(&self, body: Vec<u8>) -> AdapterResult<GenerateReply> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.generate_uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(Body::from(body))
            .map_err(|err| AdapterError::InvalidPrompt(err.to_string()))?;

        let response = timeout(self.generation_timeout, self.client.request(request))
            .await
            .map_err(|_| AdapterError::Timeout(self.generation_timeout))?
            .map_err(|err| AdapterError::unreachable(err.to_string()))?;
        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| AdapterError::unreachable(err.to_string()))?;

        if !status.is_success() {
            return Err(AdapterError::Rejected(format!(
                "{status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            )));
        }
        let reply: GenerateReply = serde_json::from_slice(&bytes)
            .map_err(|err| AdapterError::Rejected(format!("undecodable reply: {err}")))?;
        match reply.error {
            Some(error) => Err(AdapterError::Rejected(error)),
            None => Ok(reply),
        }
    }
}

#[async_trait]
impl ReviewModel for OllamaModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn probe(&self) -> bool {
        let Ok(request) = Request::get(self.tags_uri.clone()).body(Body::empty()) else {
            return false;
        };
        match timeout(self.probe_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(err)) => {
                debug!(error = %err, uri = %self.tags_uri, "ollama probe failed");
                false
            }
            Err(_) => {
                debug!(uri = %self.tags_uri, "ollama probe timed out");
                false
            }
        }
    }

    async fn review(&self, prompt: ReviewPrompt) -> AdapterResult<ReviewStream> {
        let body = serde_json::to_vec(&self.generate_body(&prompt))
            .map_err(|err| AdapterError::InvalidPrompt(err.to_string()))?;
        let reply = self.post_generate(body).await?;
        debug!(model = %self.info.model, chars = reply.response.len(), "ollama answered");
        Ok(Box::pin(stream::once(async move { Ok::<_, AdapterError>(reply.response) })))
    }
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

fn normalize_endpoint(raw: &str) -> AdapterResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let uri: Uri = trimmed
        .parse()
        .map_err(|err| AdapterError::configuration(format!("invalid endpoint {raw:?}: {err}")))?;
    match (uri.scheme_str(), uri.host()) {
        (Some("http" | "https"), Some(_)) => Ok(trimmed.to_owned()),
        _ => Err(AdapterError::configuration(format!(
            "endpoint {raw:?} must be an absolute http(s) URL"
        ))),
    }
}

fn join(endpoint: &str, path: &str) -> AdapterResult<Uri> {
    format!("{endpoint}{path}")
        .parse()
        .map_err(|err| AdapterError::configuration(format!("invalid endpoint path: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(model: &str) -> OllamaModel {
        OllamaModel::connect(OllamaConfig::new(model), &EndpointGuard::default()).unwrap()
    }

    #[test]
    fn endpoints_need_scheme_and_host() {
        for bad in ["localhost:11434", "/api", "ftp://127.0.0.1"] {
            let err = OllamaConfig::new("llama3").with_endpoint(bad).unwrap_err();
            assert!(matches!(err, AdapterError::Configuration(_)), "{bad}");
        }
        let config = OllamaConfig::new("llama3")
            .with_endpoint(" http://localhost:11434/ ")
            .unwrap();
        assert_eq!(config.endpoint(), "http://localhost:11434");
    }

    #[test]
    fn connect_checks_guard_and_model() {
        let private = OllamaConfig::new("llama3")
            .with_endpoint("http://192.168.1.20:11434")
            .unwrap();
        assert!(matches!(
            OllamaModel::connect(private, &EndpointGuard::default()),
            Err(AdapterError::EndpointBlocked(_))
        ));
        assert!(matches!(
            OllamaModel::connect(OllamaConfig::new(" "), &EndpointGuard::default()),
            Err(AdapterError::Configuration(_))
        ));

        let model = local("llama3");
        assert_eq!(model.generate_uri.path(), "/api/generate");
        assert_eq!(model.tags_uri.path(), "/api/tags");
    }

    #[test]
    fn generate_body_carries_system_and_sampling() {
        let model = local("llama3");
        let prompt = ReviewPrompt::new("File: a.rs")
            .unwrap()
            .with_system("You review code.")
            .with_temperature(0.0)
            .with_max_tokens(128);
        let json = serde_json::to_value(model.generate_body(&prompt)).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["system"], "You review code.");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 128);

        let bare = serde_json::to_value(model.generate_body(&ReviewPrompt::new("x").unwrap())).unwrap();
        assert!(bare.get("system").is_none());
        assert!(bare["options"].get("temperature").is_none());
    }

    #[test]
    fn replies_tolerate_missing_fields() {
        let reply: GenerateReply = serde_json::from_str(r#"{"response":"DENY: shell"}"#).unwrap();
        assert_eq!(reply.response, "DENY: shell");
        let failed: GenerateReply = serde_json::from_str(r#"{"error":"model not found"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("model not found"));
        assert!(failed.response.is_empty());
    }

    #[tokio::test]
    async fn probe_fails_closed_without_a_daemon() {
        let config = OllamaConfig::new("llama3")
            .with_endpoint("http://127.0.0.1:9")
            .unwrap()
            .with_probe_timeout(Duration::from_millis(200));
        let model = OllamaModel::connect(config, &EndpointGuard::default()).unwrap();
        assert!(!model.probe().await);
    }
}
