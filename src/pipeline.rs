//! End-to-end orchestration of one prediction invocation.
//!
//! The pipeline walks a fixed stage progression:
//!
//! ```text
//! INIT → SCRAPING → AGGREGATED → PROMPTED → MODEL_CALLED
//!      → {VALIDATED | INVALID} → (INVALID → FALLBACK) → DONE
//! ```
//!
//! `DONE` is the only terminal state and is reached from either `VALIDATED`
//! or `FALLBACK`, never from an unhandled error. Everything below
//! [`Pipeline::produce_prediction`] is absorbed into either "drop this item"
//! or "use fallback"; the only error surfaced to the caller is input
//! validation, raised before any scraping or model work begins.

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::aggregate::Aggregator;
use crate::error::{InvalidResponse, ParamsError};
use crate::fallback::{self, FallbackPolicy};
use crate::fetch::TextFetcher;
use crate::gateway::{Complete, InferenceConfig, ModelBackend, ModelRequest};
use crate::models::{Branch, DomainParams, PredictionOutcome};
use crate::prompt;
use crate::sources::SourceConfig;
use crate::utils::truncate_for_log;
use crate::validate;

/// Stage of one invocation, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Scraping,
    Aggregated,
    Prompted,
    ModelCalled,
    Validated,
    Invalid,
    Fallback,
    Done,
}

/// One fully wired pipeline: aggregation over an injected fetcher, a
/// (typically retry-wrapped) model capability, and the fallback policy.
/// Holds no per-invocation state; concurrent invocations are independent.
pub struct Pipeline<F: TextFetcher, M: Complete> {
    aggregator: Aggregator<F>,
    model: M,
    backend: ModelBackend,
    inference: InferenceConfig,
    sources: Vec<SourceConfig>,
    fallback: FallbackPolicy,
}

impl<F: TextFetcher, M: Complete> Pipeline<F, M> {
    pub fn new(
        aggregator: Aggregator<F>,
        model: M,
        backend: ModelBackend,
        inference: InferenceConfig,
        sources: Vec<SourceConfig>,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            aggregator,
            model,
            backend,
            inference,
            sources,
            fallback,
        }
    }

    /// Produce a schema-valid prediction for `params`.
    ///
    /// Fails only on caller-input validation; every downstream failure is
    /// converted into the fallback branch and the call still reaches `DONE`.
    #[instrument(level = "info", skip_all, fields(topic = %params.topic))]
    pub async fn produce_prediction(
        &self,
        params: &DomainParams,
    ) -> Result<PredictionOutcome, ParamsError> {
        params.validate()?;
        let mut stage = Stage::Init;

        transition(&mut stage, Stage::Scraping);
        let context = self.aggregator.aggregate(&self.sources, &params.topic).await;

        transition(&mut stage, Stage::Aggregated);
        if context.is_empty() {
            warn!("aggregation produced no usable context; skipping model call");
            return Ok(self.fall_back(&mut stage, params));
        }

        let instruction = params.task.instruction(&params.topic);
        let schema = params.task.schema();
        let prompt = prompt::build(&context, &instruction, &schema);
        transition(&mut stage, Stage::Prompted);

        let request = ModelRequest {
            prompt,
            backend: self.backend,
            config: self.inference,
        };
        let raw = match self.model.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "model call failed; using fallback");
                return Ok(self.fall_back(&mut stage, params));
            }
        };
        transition(&mut stage, Stage::ModelCalled);

        let validated = match validate::validate(&raw, &schema) {
            Ok(value) => Ok(value),
            // Token-limit truncation gets one re-ask before we give up.
            Err(InvalidResponse::Truncated) => {
                warn!("model answer looks truncated; re-asking once");
                match self.model.complete(&request).await {
                    Ok(raw) => validate::validate(&raw, &schema),
                    Err(e) => {
                        warn!(error = %e, "re-ask failed");
                        Err(InvalidResponse::Truncated)
                    }
                }
            }
            Err(e) => Err(e),
        };

        let result = validated.and_then(|value| params.task.from_validated(&value));
        match result {
            Ok(result) => {
                transition(&mut stage, Stage::Validated);
                transition(&mut stage, Stage::Done);
                info!(branch = "validated", "prediction complete");
                Ok(PredictionOutcome {
                    result,
                    branch: Branch::Validated,
                    generated_at: Utc::now(),
                })
            }
            Err(e) => {
                transition(&mut stage, Stage::Invalid);
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&raw, 300),
                    "model answer rejected; using fallback"
                );
                Ok(self.fall_back(&mut stage, params))
            }
        }
    }

    fn fall_back(&self, stage: &mut Stage, params: &DomainParams) -> PredictionOutcome {
        transition(stage, Stage::Fallback);
        let result = fallback::synthesize(params, &self.fallback);
        transition(stage, Stage::Done);
        info!(branch = "fallback", "prediction complete");
        PredictionOutcome {
            result,
            branch: Branch::Fallback,
            generated_at: Utc::now(),
        }
    }
}

fn transition(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = ?stage, to = ?next, "stage transition");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::error::{FetchError, ModelError};
    use crate::extract::{QualityRules, SelectorCascade};
    use crate::fetch::FetchOptions;
    use crate::models::PredictionResult;
    use crate::sources::SourceKind;
    use crate::tasks::{PredictionTask, default_regions};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        body: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl TextFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str, _opts: &FetchOptions) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.body {
                Some(body) => Ok(body.clone()),
                None => Err(FetchError::Network("down".to_string())),
            }
        }
    }

    enum FakeAnswer {
        Text(String),
        Fail,
    }

    struct FakeModel {
        answer: FakeAnswer,
        calls: AtomicUsize,
    }

    impl Complete for FakeModel {
        async fn complete(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                FakeAnswer::Text(t) => Ok(t.clone()),
                FakeAnswer::Fail => Err(ModelError::Api { status: 500 }),
            }
        }
    }

    fn page() -> String {
        "<html><body><article>\
         <h2>Coalition agrees on election timetable</h2>\
         <p>Party leaders settled on an autumn vote after weeks of negotiation.</p>\
         </article></body></html>"
            .to_string()
    }

    fn sources() -> Vec<SourceConfig> {
        vec![SourceConfig {
            name: "wire".to_string(),
            url: "http://wire/".to_string(),
            kind: SourceKind::Html,
            cascade: Some(SelectorCascade {
                containers: vec!["article".to_string()],
                titles: vec!["h2".to_string()],
                contents: vec!["p".to_string()],
            }),
            timeout_ms: 1_000,
            headers: Vec::new(),
            category: None,
        }]
    }

    fn pipeline(
        body: Option<String>,
        answer: FakeAnswer,
    ) -> (Pipeline<StaticFetcher, FakeModel>, Arc<AtomicUsize>) {
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            Aggregator::new(
                StaticFetcher {
                    body,
                    calls: Arc::clone(&fetch_calls),
                },
                QualityRules::default(),
            ),
            FakeModel {
                answer,
                calls: AtomicUsize::new(0),
            },
            ModelBackend::OpenAi,
            InferenceConfig::default(),
            sources(),
            FallbackPolicy {
                seed: Some(9),
                ..FallbackPolicy::default()
            },
        );
        (pipeline, fetch_calls)
    }

    fn verdict_params() -> DomainParams {
        DomainParams {
            topic: "general election".to_string(),
            sentiment_score: 0.5,
            task: PredictionTask::Verdict,
        }
    }

    #[tokio::test]
    async fn test_validated_branch() {
        let answer = "```json\n{\"verdict\": \"favorable\", \"confidence\": 70, \
                      \"explanation\": \"steady coverage\"}\n```";
        let (pipeline, _) = pipeline(Some(page()), FakeAnswer::Text(answer.to_string()));
        let outcome = pipeline.produce_prediction(&verdict_params()).await.unwrap();
        assert_eq!(outcome.branch, Branch::Validated);
        assert!(matches!(
            outcome.result,
            PredictionResult::Verdict { confidence, .. } if confidence == 70.0
        ));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let (pipeline, _) = pipeline(Some(page()), FakeAnswer::Fail);
        let outcome = pipeline.produce_prediction(&verdict_params()).await.unwrap();
        assert_eq!(outcome.branch, Branch::Fallback);
    }

    #[tokio::test]
    async fn test_unusable_answer_falls_back() {
        let (pipeline, _) = pipeline(
            Some(page()),
            FakeAnswer::Text("I would rather not speculate.".to_string()),
        );
        let outcome = pipeline.produce_prediction(&verdict_params()).await.unwrap();
        assert_eq!(outcome.branch, Branch::Fallback);
    }

    #[tokio::test]
    async fn test_total_scrape_failure_skips_model_and_falls_back() {
        let (pipeline, fetch_calls) = pipeline(None, FakeAnswer::Text("unused".to_string()));
        let outcome = pipeline.produce_prediction(&verdict_params()).await.unwrap();
        assert_eq!(outcome.branch, Branch::Fallback);
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_params_error_precedes_all_network_work() {
        let (pipeline, fetch_calls) = pipeline(Some(page()), FakeAnswer::Text("unused".to_string()));
        let params = DomainParams {
            topic: "".to_string(),
            sentiment_score: 0.0,
            task: PredictionTask::Verdict,
        };
        let err = pipeline.produce_prediction(&params).await.unwrap_err();
        assert_eq!(err, ParamsError::EmptyTopic);
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_truncated_answer_is_reasked_once() {
        // Always-truncated answers: expect exactly two model calls, then fallback.
        let (pipeline, _) = pipeline(
            Some(page()),
            FakeAnswer::Text("{\"verdict\": \"favorable\", \"confi".to_string()),
        );
        let outcome = pipeline.produce_prediction(&verdict_params()).await.unwrap();
        assert_eq!(outcome.branch, Branch::Fallback);
        assert_eq!(pipeline.model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_regional_cardinality_on_both_branches() {
        let regions = default_regions();
        let params = DomainParams {
            topic: "general election".to_string(),
            sentiment_score: 0.0,
            task: PredictionTask::RegionalShares {
                regions: regions.clone(),
            },
        };

        // Fallback branch: model fails.
        let (pipeline_fail, _) = pipeline(Some(page()), FakeAnswer::Fail);
        let outcome = pipeline_fail.produce_prediction(&params).await.unwrap();
        let PredictionResult::Regional { shares } = outcome.result else {
            panic!("expected regional");
        };
        assert_eq!(shares.len(), 47);

        // Validated branch: model covers every region.
        let entries: Vec<String> = regions
            .iter()
            .map(|r| format!("{{\"region\": \"{r}\", \"share\": 2.1}}"))
            .collect();
        let answer = format!("{{\"shares\": [{}]}}", entries.join(","));
        let (pipeline_ok, _) = pipeline(Some(page()), FakeAnswer::Text(answer));
        let outcome = pipeline_ok.produce_prediction(&params).await.unwrap();
        assert_eq!(outcome.branch, Branch::Validated);
        let PredictionResult::Regional { shares } = outcome.result else {
            panic!("expected regional");
        };
        assert_eq!(shares.len(), 47);
        assert_eq!(shares[0].region, regions[0]);
    }
}
