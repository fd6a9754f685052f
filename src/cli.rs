//! Command-line interface definitions.
//!
//! All options can be given as flags; the model credentials and backend
//! selection also fall back to environment variables so deployments don't
//! put keys on the command line.

use clap::Parser;

use crate::gateway::ModelBackend;

/// Which prediction task to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TaskArg {
    /// Fixed-cardinality share distribution over the region list.
    Regional,
    /// Single favorable/unfavorable/uncertain call with confidence.
    Verdict,
}

/// Command-line arguments for one pipeline invocation.
///
/// # Examples
///
/// ```sh
/// # Verdict on the default topic with built-in sources
/// pollcast --task verdict
///
/// # Regional distribution with a custom source set, result to a file
/// pollcast --task regional --sources sources.yaml -o prediction.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Topic to aggregate coverage for and predict on
    #[arg(short, long, default_value = "national election")]
    pub topic: String,

    /// Prediction task to run
    #[arg(long, value_enum, default_value_t = TaskArg::Verdict)]
    pub task: TaskArg,

    /// Prior sentiment signal in [-1, 1]; drives fallback synthesis
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub sentiment: f64,

    /// YAML file with source configurations (built-in set if omitted)
    #[arg(short, long)]
    pub sources: Option<String>,

    /// YAML file with the region list (47 prefectures if omitted)
    #[arg(long)]
    pub regions: Option<String>,

    /// Generative backend to call
    #[arg(long, value_enum, env = "MODEL_BACKEND", default_value_t = ModelBackend::OpenAi)]
    pub backend: ModelBackend,

    /// API key for the selected backend
    #[arg(long, env = "MODEL_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,

    /// Base URL override, e.g. for a self-hosted endpoint
    #[arg(long, env = "MODEL_BASE_URL")]
    pub base_url: Option<String>,

    /// Model name sent to the backend
    #[arg(long, env = "MODEL_NAME", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.2)]
    pub temperature: f32,

    /// Completion token budget
    #[arg(long, default_value_t = 512)]
    pub max_tokens: u32,

    /// Fixed seed for fallback jitter (reproducible runs)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the result JSON here instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,
}
