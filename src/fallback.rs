//! Deterministic fallback synthesis: the branch that never fails.
//!
//! Whenever scraping yields nothing useful or the model/validator stage
//! fails, the pipeline still owes the caller a schema-valid answer. The
//! synthesizer derives one formulaically from the sentiment input:
//! a baseline adjusted by `sentiment * gain` plus bounded pseudo-random
//! jitter, clamped into the policy's range. The randomness source is a
//! seedable [`StdRng`] so tests get byte-identical output from a fixed seed
//! while production runs stay varied.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::models::{DomainParams, PredictionResult, RegionShare, Verdict};
use crate::tasks::PredictionTask;

/// Clamp ranges, derivation coefficients, and the jitter seed.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Neutral-sentiment confidence.
    pub baseline: f64,
    /// Confidence points per unit of sentiment.
    pub sentiment_gain: f64,
    /// Jitter amplitude, applied as ±jitter.
    pub jitter: f64,
    pub clamp_min: f64,
    pub clamp_max: f64,
    /// Fixed seed for reproducible synthesis; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            baseline: 50.0,
            sentiment_gain: 20.0,
            jitter: 5.0,
            clamp_min: 10.0,
            clamp_max: 90.0,
            seed: None,
        }
    }
}

impl FallbackPolicy {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.clamp_min, self.clamp_max)
    }
}

/// Produce a schema-valid synthetic result. Always succeeds.
///
/// Regional shares start from an even split, get per-region jitter, and are
/// rescaled to sum to 100 with each share held in [0, 100]. Verdict
/// confidence is `baseline + sentiment * gain + jitter` clamped into the
/// policy range, with the direction taken from the sentiment sign.
pub fn synthesize(params: &DomainParams, policy: &FallbackPolicy) -> PredictionResult {
    let mut rng = policy.rng();
    let sentiment = params.sentiment_score;

    let result = match &params.task {
        PredictionTask::RegionalShares { regions } => {
            let even = 100.0 / regions.len() as f64;
            let mut raw: Vec<f64> = regions
                .iter()
                .map(|_| {
                    let wobble = rng.random_range(-policy.jitter..=policy.jitter) / 10.0;
                    (even + wobble).max(0.1)
                })
                .collect();
            let total: f64 = raw.iter().sum();
            for share in &mut raw {
                *share = round1(*share / total * 100.0).clamp(0.0, 100.0);
            }
            PredictionResult::Regional {
                shares: regions
                    .iter()
                    .zip(raw)
                    .map(|(region, share)| RegionShare {
                        region: region.clone(),
                        share,
                    })
                    .collect(),
            }
        }
        PredictionTask::Verdict => {
            let jitter = rng.random_range(-policy.jitter..=policy.jitter);
            let confidence =
                round1(policy.clamp(policy.baseline + sentiment * policy.sentiment_gain + jitter));
            let verdict = if sentiment > 0.15 {
                Verdict::Favorable
            } else if sentiment < -0.15 {
                Verdict::Unfavorable
            } else {
                Verdict::Uncertain
            };
            PredictionResult::Verdict {
                verdict,
                confidence,
                explanation: format!(
                    "Synthesized from prior sentiment for \"{}\"; live coverage was unavailable.",
                    params.topic
                ),
            }
        }
    };

    info!(task = task_name(&params.task), "fallback synthesis produced a result");
    result
}

fn task_name(task: &PredictionTask) -> &'static str {
    match task {
        PredictionTask::RegionalShares { .. } => "regional_shares",
        PredictionTask::Verdict => "verdict",
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
