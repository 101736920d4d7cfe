use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::completion::{DEFAULT_COMPLETION_MODEL, DEFAULT_COMPLETION_URL};
use crate::execution::DEFAULT_POOL_SIZE;
use crate::visualize::DEFAULT_CHART_ROW_CAP;
use crate::workflow::{DEFAULT_EVIDENCE_K, DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_TABLE_PREVIEW_ROWS};

#[derive(Parser, Debug)]
#[command(
    name = "askdb",
    version,
    about = "Answer free-text questions about a SQLite database"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Index(IndexArgs),
    Search(SearchArgs),
    Ask(AskArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = ".cache/askdb")]
    pub cache_root: PathBuf,

    #[arg(long, env = "ASKDB_DB_PATH")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "hash-bigram-384-v1")]
    pub model_id: String,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long = "table")]
    pub tables: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = ".cache/askdb")]
    pub cache_root: PathBuf,

    #[arg(long, env = "ASKDB_DB_PATH")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "hash-bigram-384-v1")]
    pub model_id: String,

    #[arg(long)]
    pub query: Option<String>,

    #[arg(long = "term")]
    pub terms: Vec<String>,

    #[arg(long, default_value_t = 10)]
    pub k: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolvabilityMode {
    Lean,
    Strict,
}

impl ResolvabilityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lean => "lean",
            Self::Strict => "strict",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    #[arg(long, default_value = ".cache/askdb")]
    pub cache_root: PathBuf,

    #[arg(long, env = "ASKDB_DB_PATH")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "hash-bigram-384-v1")]
    pub model_id: String,

    #[arg(long = "query", required = true)]
    pub queries: Vec<String>,

    #[arg(long)]
    pub schema_path: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_RETRY_ATTEMPTS)]
    pub max_retry_attempts: usize,

    #[arg(long, default_value_t = DEFAULT_EVIDENCE_K)]
    pub per_term_k: usize,

    #[arg(long, default_value_t = DEFAULT_EVIDENCE_K)]
    pub whole_query_k: usize,

    #[arg(long, default_value_t = DEFAULT_CHART_ROW_CAP)]
    pub chart_row_cap: usize,

    #[arg(long, default_value_t = DEFAULT_TABLE_PREVIEW_ROWS)]
    pub table_preview_rows: usize,

    #[arg(long, value_enum, default_value_t = ResolvabilityMode::Lean)]
    pub resolvability: ResolvabilityMode,

    #[arg(long, default_value_t = false)]
    pub validate: bool,

    /// Wall-clock budget per question; 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub deadline_ms: u64,

    #[arg(long, env = "ASKDB_COMPLETION_URL", default_value = DEFAULT_COMPLETION_URL)]
    pub completion_url: String,

    #[arg(long, env = "ASKDB_COMPLETION_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    pub completion_model: String,

    #[arg(long, env = "ASKDB_COMPLETION_API_KEY", hide_env_values = true)]
    pub completion_api_key: Option<String>,

    #[arg(long, default_value_t = 120)]
    pub completion_timeout_secs: u64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/askdb")]
    pub cache_root: PathBuf,

    #[arg(long, env = "ASKDB_DB_PATH")]
    pub db_path: Option<PathBuf>,
}
