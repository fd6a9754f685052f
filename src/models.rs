//! Data models for scraped context and typed prediction results.
//!
//! This module defines the structures that flow through one pipeline
//! invocation:
//! - [`ScrapedItem`]: one quality-filtered item extracted from a source
//! - [`AggregatedContext`]: the merged multi-source context plus trending terms
//! - [`DomainParams`]: caller input, validated before any network work
//! - [`PredictionResult`] / [`PredictionOutcome`]: the typed answer and the
//!   branch (validated model answer vs. synthetic fallback) that produced it
//!
//! Everything here is created at the start of one invocation and discarded at
//! its end; nothing persists across invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParamsError;
use crate::tasks::PredictionTask;

/// One politically-relevant item extracted from a source.
///
/// Title and content are non-empty and have passed the quality rules
/// (length bands, boilerplate markers, relevance keywords) before a value of
/// this type is ever constructed by the extractor.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapedItem {
    /// Headline text. Within the configured title band (>10, <150 chars).
    pub title: String,
    /// Body or summary text. Within the configured content band (>20, <300 chars).
    pub content: String,
    /// Name of the configured source this item came from.
    pub source: String,
    /// When the source was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Optional category carried from the source configuration.
    pub category: Option<String>,
}

impl ScrapedItem {
    /// Extract the registrable label from a URL-shaped source identifier.
    /// For example: "https://lite.cnn.com/article" -> "cnn". Non-URL source
    /// names are returned as-is so prompt lines always carry a short tag.
    pub fn source_tag(&self) -> String {
        if let Ok(parsed) = url::Url::parse(&self.source) {
            if let Some(host) = parsed.host_str() {
                let parts: Vec<&str> = host.split('.').collect();
                if parts.len() >= 2 {
                    return parts[parts.len() - 2].to_string();
                }
            }
        }
        self.source.clone()
    }
}

/// The merged result of one aggregation pass.
///
/// Owned exclusively by the invocation that built it; the only mutation point
/// is the single-threaded merge after every source task has settled.
#[derive(Debug, Default)]
pub struct AggregatedContext {
    /// Deduplicated, capped items across all sources.
    pub items: Vec<ScrapedItem>,
    /// Frequency-ranked content terms after stop-word stripping.
    pub trending_terms: Vec<String>,
}

impl AggregatedContext {
    /// True when no source produced a usable item; the pipeline then skips
    /// the model call entirely and goes straight to fallback.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Caller input for one prediction.
#[derive(Debug, Clone)]
pub struct DomainParams {
    /// Topic to aggregate and predict on, e.g. "national election".
    pub topic: String,
    /// Prior sentiment signal in [-1, 1]; drives fallback synthesis.
    pub sentiment_score: f64,
    /// Which instruction template and output schema apply.
    pub task: PredictionTask,
}

impl DomainParams {
    /// Validate mandatory inputs. Called before any scraping or model work;
    /// this is the only failure `produce_prediction` surfaces to the caller.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.topic.trim().is_empty() {
            return Err(ParamsError::EmptyTopic);
        }
        if !(-1.0..=1.0).contains(&self.sentiment_score) {
            return Err(ParamsError::SentimentOutOfRange(self.sentiment_score));
        }
        if let PredictionTask::RegionalShares { regions } = &self.task {
            if regions.is_empty() {
                return Err(ParamsError::EmptyRegions);
            }
            let mut seen = std::collections::HashSet::new();
            for region in regions {
                if !seen.insert(region.as_str()) {
                    return Err(ParamsError::DuplicateRegion(region.clone()));
                }
            }
        }
        Ok(())
    }
}

/// One region's predicted share of the outcome, in [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionShare {
    pub region: String,
    pub share: f64,
}

/// Direction of a verdict-style prediction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Favorable,
    Unfavorable,
    Uncertain,
}

/// The typed, schema-valid answer. Every variant honors its declared ranges
/// regardless of which branch produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionResult {
    /// Fixed-cardinality distribution over the configured region list, in
    /// list order, each share in [0, 100].
    Regional { shares: Vec<RegionShare> },
    /// A single call with confidence in [10, 90].
    Verdict {
        verdict: Verdict,
        confidence: f64,
        explanation: String,
    },
}

/// Which path of the state machine reached `DONE`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// The model answered and the validator accepted it.
    Validated,
    /// Scraping yielded nothing useful, or the model/validator stage failed.
    Fallback,
}

/// The result plus provenance, serialized as the binary's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub result: PredictionResult,
    pub branch: Branch,
    pub generated_at: DateTime<Utc>,
}
