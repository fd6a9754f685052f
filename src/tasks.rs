//! Prediction tasks: instruction templates, output schemas, and conversion
//! of a validated JSON object into the typed result.
//!
//! Two task shapes exist:
//! - [`PredictionTask::RegionalShares`]: a fixed-cardinality distribution
//!   over a configured region list (defaults to the 47 prefectures).
//! - [`PredictionTask::Verdict`]: a single directional call with confidence.
//!
//! The schemas here are what the validator enforces and what the prompt
//! builder spells out literally to the backend.

use serde_json::Value;

use crate::error::InvalidResponse;
use crate::models::{PredictionResult, RegionShare, Verdict};
use crate::validate::{FieldKind, FieldSpec, OutputSchema};

pub const VERDICT_VALUES: &[&str] = &["favorable", "unfavorable", "uncertain"];

/// Which instruction template and output schema apply to an invocation.
#[derive(Debug, Clone)]
pub enum PredictionTask {
    RegionalShares { regions: Vec<String> },
    Verdict,
}

impl PredictionTask {
    /// The caller-supplied natural-language task description, topic included.
    pub fn instruction(&self, topic: &str) -> String {
        match self {
            PredictionTask::RegionalShares { regions } => format!(
                "Task: based on the context above, estimate the likely outcome of \
                 \"{topic}\" as a percentage share per region. Cover every one of the \
                 following {count} regions exactly once, using these exact names: {names}. \
                 Shares are percentages in [0, 100].",
                count = regions.len(),
                names = regions.join(", "),
            ),
            PredictionTask::Verdict => format!(
                "Task: based on the context above, judge whether the near-term outlook \
                 for \"{topic}\" is favorable, unfavorable, or uncertain, with a \
                 confidence between 10 and 90 and a one-sentence explanation."
            ),
        }
    }

    /// The contract the validator enforces on the model's answer.
    pub fn schema(&self) -> OutputSchema {
        match self {
            PredictionTask::RegionalShares { .. } => OutputSchema {
                fields: vec![FieldSpec {
                    name: "shares",
                    kind: FieldKind::ObjectArray {
                        item_fields: vec![
                            FieldSpec {
                                name: "region",
                                kind: FieldKind::String,
                            },
                            FieldSpec {
                                name: "share",
                                kind: FieldKind::Number { min: 0.0, max: 100.0 },
                            },
                        ],
                    },
                }],
            },
            PredictionTask::Verdict => OutputSchema {
                fields: vec![
                    FieldSpec {
                        name: "verdict",
                        kind: FieldKind::Enum(VERDICT_VALUES),
                    },
                    FieldSpec {
                        name: "confidence",
                        kind: FieldKind::Number { min: 10.0, max: 90.0 },
                    },
                    FieldSpec {
                        name: "explanation",
                        kind: FieldKind::String,
                    },
                ],
            },
        }
    }

    /// Convert a schema-validated JSON object into the typed result.
    ///
    /// For regional shares this additionally enforces full coverage of the
    /// configured region list and reorders the answer into list order;
    /// unknown regions are dropped, missing ones are `Invalid`. Types and
    /// ranges were already checked (and clamped) by the validator.
    pub fn from_validated(&self, value: &Value) -> Result<PredictionResult, InvalidResponse> {
        match self {
            PredictionTask::RegionalShares { regions } => {
                let entries = value["shares"]
                    .as_array()
                    .ok_or(InvalidResponse::MissingField("shares".to_string()))?;

                let mut by_region: std::collections::HashMap<String, f64> =
                    std::collections::HashMap::new();
                for entry in entries {
                    let (Some(region), Some(share)) =
                        (entry["region"].as_str(), entry["share"].as_f64())
                    else {
                        continue;
                    };
                    by_region.entry(region.trim().to_string()).or_insert(share);
                }

                let mut shares = Vec::with_capacity(regions.len());
                for region in regions {
                    let share = by_region
                        .get(region.as_str())
                        .copied()
                        .ok_or_else(|| InvalidResponse::MissingRegion(region.clone()))?;
                    shares.push(RegionShare {
                        region: region.clone(),
                        share,
                    });
                }
                Ok(PredictionResult::Regional { shares })
            }
            PredictionTask::Verdict => {
                let verdict = match value["verdict"].as_str() {
                    Some("favorable") => Verdict::Favorable,
                    Some("unfavorable") => Verdict::Unfavorable,
                    Some("uncertain") => Verdict::Uncertain,
                    _ => {
                        return Err(InvalidResponse::WrongType {
                            field: "verdict".to_string(),
                            expected: "one of the listed values",
                        });
                    }
                };
                let confidence = value["confidence"]
                    .as_f64()
                    .ok_or(InvalidResponse::MissingField("confidence".to_string()))?;
                let explanation = value["explanation"]
                    .as_str()
                    .ok_or(InvalidResponse::MissingField("explanation".to_string()))?
                    .to_string();
                Ok(PredictionResult::Verdict {
                    verdict,
                    confidence,
                    explanation,
                })
            }
        }
    }
}

/// The default region list: the 47 prefectures, north to south.
pub fn default_regions() -> Vec<String> {
    [
        "Hokkaido", "Aomori", "Iwate", "Miyagi", "Akita", "Yamagata", "Fukushima", "Ibaraki",
        "Tochigi", "Gunma", "Saitama", "Chiba", "Tokyo", "Kanagawa", "Niigata", "Toyama",
        "Ishikawa", "Fukui", "Yamanashi", "Nagano", "Gifu", "Shizuoka", "Aichi", "Mie", "Shiga",
        "Kyoto", "Osaka", "Hyogo", "Nara", "Wakayama", "Tottori", "Shimane", "Okayama",
        "Hiroshima", "Yamaguchi", "Tokushima", "Kagawa", "Ehime", "Kochi", "Fukuoka", "Saga",
        "Nagasaki", "Kumamoto", "Oita", "Miyazaki", "Kagoshima", "Okinawa",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
