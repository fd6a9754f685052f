//! Error taxonomy for the prediction pipeline.
//!
//! Errors are layered by how far they are allowed to travel:
//! - [`FetchError`]: per-source fetch failure. Recovered locally by the
//!   aggregator; the source simply contributes zero items.
//! - [`ModelError`]: the generative backend call failed. Triggers fallback
//!   synthesis after the retry policy is exhausted.
//! - [`InvalidResponse`]: the backend answered, but not in the required
//!   shape. Triggers fallback synthesis.
//! - [`ParamsError`]: caller-input validation. The only error that escapes
//!   `produce_prediction`, raised before any scraping or model work begins.

use thiserror::Error;

/// Failure fetching raw text from a single source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, or another transport-level problem.
    #[error("network error: {0}")]
    Network(String),

    /// The configured per-source timeout elapsed before a response arrived.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The server answered with a non-2xx status.
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Failure talking to the generative-model backend.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The backend did not answer within the configured timeout.
    #[error("model call timed out")]
    Timeout,

    /// Credentials were rejected (401/403). Never retried.
    #[error("backend rejected credentials")]
    Auth,

    /// The backend answered with a non-2xx status.
    #[error("backend returned status {status}")]
    Api { status: u16 },

    /// Transport-level failure before any HTTP status was received.
    #[error("network error talking to backend: {0}")]
    Network(String),

    /// The backend answered 2xx but the body matched no known response shape.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Timeouts, transport errors, 429 and 5xx are transient. Authentication
    /// failures and malformed payloads are not and propagate immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Timeout | ModelError::Network(_) => true,
            ModelError::Api { status } => *status == 429 || *status >= 500,
            ModelError::Auth | ModelError::Malformed(_) => false,
        }
    }
}

/// Reasons the validator can refuse a model answer.
#[derive(Debug, Error)]
pub enum InvalidResponse {
    /// No balanced `{...}` span was found anywhere in the raw text.
    #[error("no JSON object found in model output")]
    NoJsonObject,

    /// The recovered span stopped mid-object, typically a token-limit cut.
    /// The pipeline re-asks once on this variant before falling back.
    #[error("model output looks truncated")]
    Truncated,

    /// The recovered span was not parseable JSON.
    #[error("model output is not valid JSON: {0}")]
    Parse(String),

    /// A field the schema requires is absent.
    #[error("missing required field `{0}`")]
    MissingField(String),

    /// A required field is present but has the wrong type.
    #[error("field `{field}` has wrong type (expected {expected})")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    /// A region distribution did not cover the configured region list.
    #[error("shares missing region `{0}`")]
    MissingRegion(String),
}

/// Caller-input validation failure, surfaced before any pipeline work.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("sentiment score {0} is outside [-1, 1]")]
    SentimentOutOfRange(f64),

    #[error("region list must not be empty")]
    EmptyRegions,

    #[error("region list contains duplicate `{0}`")]
    DuplicateRegion(String),
}
