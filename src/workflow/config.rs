use std::time::Duration;

use serde::Serialize;

use crate::visualize::DEFAULT_CHART_ROW_CAP;

pub const DEFAULT_MAX_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_EVIDENCE_K: usize = 10;
pub const DEFAULT_TABLE_PREVIEW_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvabilityPolicy {
    /// Only an explicit "no" rejects the question. Unparseable output and failed calls pass.
    LeanResolvable,
    Strict,
}

impl ResolvabilityPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeanResolvable => "lean_resolvable",
            Self::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowConfig {
    pub max_retry_attempts: usize,
    pub per_term_k: usize,
    pub whole_query_k: usize,
    pub min_term_chars: usize,
    pub chart_row_cap: usize,
    pub table_preview_rows: usize,
    pub final_prompt_rows: usize,
    pub resolvability_policy: ResolvabilityPolicy,
    pub validate_results: bool,
    pub deadline: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            per_term_k: DEFAULT_EVIDENCE_K,
            whole_query_k: DEFAULT_EVIDENCE_K,
            min_term_chars: crate::evidence::MIN_TERM_CHARS,
            chart_row_cap: DEFAULT_CHART_ROW_CAP,
            table_preview_rows: DEFAULT_TABLE_PREVIEW_ROWS,
            final_prompt_rows: 100,
            resolvability_policy: ResolvabilityPolicy::LeanResolvable,
            validate_results: false,
            deadline: None,
        }
    }
}
