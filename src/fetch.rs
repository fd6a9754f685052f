//! Raw-content fetching with per-call timeouts and custom headers.
//!
//! The fetcher is the pipeline's only seam to the network on the scraping
//! side. It is deliberately dumb: one URL in, text out, typed error on
//! failure, no retries. Retry policy, when any exists, belongs to the caller.
//!
//! The [`TextFetcher`] trait keeps the aggregator testable with a fake
//! fetcher instead of real network calls.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};

use crate::error::FetchError;

/// Per-call fetch options carried on each source configuration.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Hard deadline for the whole request, connect included.
    pub timeout: Duration,
    /// Extra request headers as (name, value) pairs.
    pub headers: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            headers: Vec::new(),
        }
    }
}

/// Capability to fetch raw text from a URL.
///
/// Production uses [`HttpFetcher`]; tests inject fakes.
pub trait TextFetcher {
    /// Fetch the body at `url` as text.
    ///
    /// Fails with [`FetchError::Timeout`] when the deadline elapses first,
    /// [`FetchError::Status`] on non-2xx, and [`FetchError::Network`] for
    /// transport-level failures. Never escalates beyond its own call.
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher shared by all source tasks of an invocation.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pollcast/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TextFetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<String, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &opts.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Network(format!("bad header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::Network(format!("bad header value: {e}")))?;
            headers.insert(name, value);
        }

        let timeout_ms = opts.timeout.as_millis() as u64;
        let response = self
            .http
            .get(url)
            .headers(headers)
            .timeout(opts.timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify(e, timeout_ms))?;
        debug!(bytes = body.len(), "fetched source body");
        Ok(body)
    }
}

fn classify(e: reqwest::Error, timeout_ms: u64) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout_ms)
    } else {
        FetchError::Network(e.to_string())
    }
}
