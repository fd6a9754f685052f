//! Generative-model gateway with bounded retries.
//!
//! The gateway is the pipeline's only seam to the inference backend. It
//! normalizes the zoo of backend response shapes (OpenAI-style chat
//! completions, Anthropic-style message blocks, error bodies) into one
//! internal type at this boundary, so nothing downstream ever probes
//! optional nested fields.
//!
//! # Retry Strategy
//!
//! All retrying lives in one explicit [`RetryPolicy`] (max attempts, backoff
//! schedule, transient-error predicate) applied by the [`Retrying`]
//! decorator. Only transient failures (timeouts, 429, 5xx, transport errors)
//! are retried; authentication and malformed-payload failures propagate
//! immediately. A small random jitter is added to every delay.

use std::time::{Duration, Instant};

use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::error::ModelError;

/// Supported backend identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelBackend {
    /// OpenAI chat completions.
    #[default]
    OpenAi,
    /// Anthropic messages.
    Anthropic,
    /// Any self-hosted OpenAI-compatible endpoint (requires a base URL).
    Compatible,
}

impl ModelBackend {
    fn default_base_url(&self) -> &'static str {
        match self {
            ModelBackend::OpenAi => "https://api.openai.com/v1",
            ModelBackend::Anthropic => "https://api.anthropic.com",
            ModelBackend::Compatible => "http://localhost:11434/v1",
        }
    }
}

/// Inference configuration carried on every request.
#[derive(Debug, Clone, Copy)]
pub struct InferenceConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
        }
    }
}

/// One request to the generative backend. Immutable once built.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub backend: ModelBackend,
    pub config: InferenceConfig,
}

/// Capability to turn a [`ModelRequest`] into raw completion text.
///
/// Production uses [`ModelClient`] wrapped in [`Retrying`]; tests inject
/// fakes. Either text comes back or a typed [`ModelError`] does — a failure
/// is never silently swallowed.
pub trait Complete {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

// ---- Backend response shapes ----

/// Tagged union of the response bodies backends actually send. Normalized
/// to plain text (or a typed error) before anything leaves this module.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BackendPayload {
    Chat { choices: Vec<ChatChoice> },
    Messages { content: Vec<ContentBlock> },
    Error { error: ErrorBody },
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn normalize(payload: BackendPayload) -> Result<String, ModelError> {
    match payload {
        BackendPayload::Chat { choices } => {
            let text = choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default();
            if text.is_empty() {
                Err(ModelError::Malformed("empty choices".to_string()))
            } else {
                Ok(text)
            }
        }
        BackendPayload::Messages { content } => {
            let text = content
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("");
            if text.is_empty() {
                Err(ModelError::Malformed("no text blocks".to_string()))
            } else {
                Ok(text)
            }
        }
        BackendPayload::Error { error } => Err(ModelError::Malformed(format!(
            "backend error body: {}",
            error.message
        ))),
    }
}

// ---- Production client ----

/// reqwest-backed client for the supported backends.
pub struct ModelClient {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ModelClient {
    /// `base_url` overrides the backend's default endpoint, e.g. for a
    /// self-hosted deployment.
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pollcast/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
            timeout: Duration::from_secs(30),
        }
    }

    fn base_url_for(&self, backend: ModelBackend) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| backend.default_base_url().to_string())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OutboundMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl Complete for ModelClient {
    #[instrument(level = "info", skip_all, fields(backend = ?request.backend, model = %self.model))]
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let base = self.base_url_for(request.backend);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![OutboundMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
        };

        let builder = match request.backend {
            ModelBackend::OpenAi | ModelBackend::Compatible => self
                .http
                .post(format!("{base}/chat/completions"))
                .bearer_auth(&self.api_key),
            ModelBackend::Anthropic => self
                .http
                .post(format!("{base}/v1/messages"))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
        };

        let response = builder
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Auth);
        }
        if !status.is_success() {
            return Err(ModelError::Api {
                status: status.as_u16(),
            });
        }

        let payload: BackendPayload = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let text = normalize(payload)?;
        debug!(bytes = text.len(), "backend completion received");
        Ok(text)
    }
}

// ---- Retry policy ----

/// How successive retry delays grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// One bounded retry policy shared by every call site that retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    /// Jitter is added by the caller.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16)),
        };
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed for this error.
    pub fn should_retry(&self, error: &ModelError, attempt: usize) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }
}

/// Decorator that applies a [`RetryPolicy`] to any [`Complete`] impl.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Complete> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T: Complete> Complete for Retrying<T> {
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let total_t0 = Instant::now();
        let mut attempt = 1usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !self.policy.should_retry(&e, attempt) {
                        error!(
                            attempt,
                            max = self.policy.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            transient = e.is_transient(),
                            error = %e,
                            "model call failed terminally"
                        );
                        return Err(e);
                    }

                    let jitter = Duration::from_millis(rng().random_range(0..=250));
                    let delay = self.policy.delay_for(attempt) + jitter;
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "model call attempt failed; backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> ModelRequest {
        ModelRequest {
            prompt: "hello".to_string(),
            backend: ModelBackend::OpenAi,
            config: InferenceConfig::default(),
        }
    }

    #[test]
    fn test_normalize_openai_shape() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}]}"#;
        let payload: BackendPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(normalize(payload).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_normalize_anthropic_shape() {
        let raw = r#"{"content": [{"type": "text", "text": "half "}, {"type": "text", "text": "answer"}]}"#;
        let payload: BackendPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(normalize(payload).unwrap(), "half answer");
    }

    #[test]
    fn test_normalize_error_body() {
        let raw = r#"{"error": {"message": "model overloaded", "type": "overloaded_error"}}"#;
        let payload: BackendPayload = serde_json::from_str(raw).unwrap();
        let err = normalize(payload).unwrap_err();
        assert!(matches!(err, ModelError::Malformed(m) if m.contains("model overloaded")));
    }

    #[test]
    fn test_normalize_empty_choices_is_malformed() {
        let payload: BackendPayload = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(normalize(payload).is_err());
    }

    #[test]
    fn test_delay_schedules() {
        let fixed = RetryPolicy::default();
        assert_eq!(fixed.delay_for(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for(2), Duration::from_millis(500));

        let expo = RetryPolicy {
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 6,
        };
        assert_eq!(expo.delay_for(1), Duration::from_secs(1));
        assert_eq!(expo.delay_for(3), Duration::from_secs(4));
        assert_eq!(expo.delay_for(6), Duration::from_secs(30));
    }

    struct FlakyModel {
        calls: AtomicUsize,
        fail_first: usize,
        error: fn() -> ModelError,
    }

    impl Complete for FlakyModel {
        async fn complete(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error)())
            } else {
                Ok("done".to_string())
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff: Backoff::Fixed,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let model = FlakyModel {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            error: || ModelError::Timeout,
        };
        let retrying = Retrying::new(model, fast_policy());
        let out = retrying.complete(&request()).await.unwrap();
        assert_eq!(out, "done");
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let model = FlakyModel {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            error: || ModelError::Api { status: 503 },
        };
        let retrying = Retrying::new(model, fast_policy());
        let err = retrying.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Api { status: 503 }));
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_never_retried() {
        let model = FlakyModel {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            error: || ModelError::Auth,
        };
        let retrying = Retrying::new(model, fast_policy());
        let err = retrying.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Auth));
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 1);
    }
}
