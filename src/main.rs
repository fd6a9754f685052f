//! # pollcast
//!
//! A prediction pipeline that aggregates politically-relevant coverage from
//! multiple unreliable web sources, synthesizes it into a prompt for a
//! generative-language backend, and converts the backend's free-text answer
//! into a strictly-typed, schema-valid result. When scraping or the backend
//! fails, a deterministic fallback synthesizer still produces a well-formed
//! answer — the caller always gets one.
//!
//! ## Usage
//!
//! ```sh
//! pollcast --task verdict --topic "snap election"
//! pollcast --task regional --sources sources.yaml -o prediction.json
//! ```
//!
//! ## Architecture
//!
//! One invocation walks a fixed pipeline:
//! 1. **Scraping**: fan out one fetch+extract task per configured source
//! 2. **Aggregation**: merge, dedupe, cap, derive trending terms
//! 3. **Prompting**: bounded context + task instruction + output contract
//! 4. **Inference**: retry-wrapped backend call
//! 5. **Validation**: recover and clamp the JSON answer, or fall back

use clap::Parser;
use std::error::Error;
use tracing::{error, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod aggregate;
mod cli;
mod error;
mod extract;
mod fallback;
mod fetch;
mod gateway;
mod models;
mod pipeline;
mod prompt;
mod sources;
mod tasks;
mod utils;
mod validate;

use aggregate::Aggregator;
use cli::{Cli, TaskArg};
use extract::QualityRules;
use fallback::FallbackPolicy;
use fetch::HttpFetcher;
use gateway::{InferenceConfig, ModelClient, RetryPolicy, Retrying};
use models::DomainParams;
use pipeline::Pipeline;
use tasks::{PredictionTask, default_regions};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    info!(topic = %args.topic, task = ?args.task, backend = ?args.backend, "pollcast starting up");

    // ---- Sources and regions ----
    let source_configs = match &args.sources {
        Some(path) => sources::load_sources(path).await?,
        None => sources::default_sources(),
    };
    info!(count = source_configs.len(), "source set ready");

    let task = match args.task {
        TaskArg::Verdict => PredictionTask::Verdict,
        TaskArg::Regional => {
            let regions = match &args.regions {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(path).await?;
                    serde_yaml::from_str::<Vec<String>>(&raw)?
                }
                None => default_regions(),
            };
            PredictionTask::RegionalShares { regions }
        }
    };

    let params = DomainParams {
        topic: args.topic.clone(),
        sentiment_score: args.sentiment,
        task,
    };

    // ---- Wire the pipeline ----
    let aggregator = Aggregator::new(HttpFetcher::new(), QualityRules::default());
    let model = Retrying::new(
        ModelClient::new(args.api_key.clone(), args.model.clone(), args.base_url.clone()),
        RetryPolicy::default(),
    );
    let fallback_policy = FallbackPolicy {
        seed: args.seed,
        ..FallbackPolicy::default()
    };
    let pipeline = Pipeline::new(
        aggregator,
        model,
        args.backend,
        InferenceConfig {
            temperature: args.temperature,
            max_tokens: args.max_tokens,
        },
        source_configs,
        fallback_policy,
    );

    // ---- Run ----
    let outcome = match pipeline.produce_prediction(&params).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "invalid input parameters");
            return Err(e.into());
        }
    };

    let json = serde_json::to_string_pretty(&outcome)?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &json).await?;
            info!(%path, "wrote prediction JSON");
        }
        None => println!("{json}"),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        branch = ?outcome.branch,
        "execution complete"
    );
    Ok(())
}
