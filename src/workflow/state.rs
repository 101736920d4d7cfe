use serde::Serialize;
use tracing::info;

use crate::evidence::EvidenceBundle;
use crate::model::ExecutionResult;
use crate::util::sha256_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Resolvable,
    Unresolvable,
    Executing,
    Succeeded,
    Exhausted,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolvable => "resolvable",
            Self::Unresolvable => "unresolvable",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Start,
    TermsExtracted,
    EvidenceGathered,
    ResolvabilityChecked,
    Unresolvable,
    SqlGenerated,
    GenerationFailed,
    Executing,
    SqlFailed,
    Correcting,
    Succeeded,
    Exhausted,
}

impl WorkflowPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::TermsExtracted => "terms_extracted",
            Self::EvidenceGathered => "evidence_gathered",
            Self::ResolvabilityChecked => "resolvability_checked",
            Self::Unresolvable => "unresolvable",
            Self::SqlGenerated => "sql_generated",
            Self::GenerationFailed => "generation_failed",
            Self::Executing => "executing",
            Self::SqlFailed => "sql_failed",
            Self::Correcting => "correcting",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub sql: String,
    pub success: bool,
    pub error: Option<String>,
    pub row_count: usize,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub question_id: String,
    pub user_query: String,
    pub extracted_terms: Vec<String>,
    pub extraction_failure: Option<String>,
    #[serde(skip)]
    pub evidence: EvidenceBundle,
    pub candidate_sql: Option<String>,
    /// Corrected queries produced so far; the first draft is not counted.
    pub attempt_count: usize,
    pub last_error: Option<String>,
    pub status: WorkflowStatus,
    pub trail: Vec<WorkflowPhase>,
    pub attempts: Vec<AttemptRecord>,
}

impl WorkflowState {
    pub fn new(user_query: &str) -> Self {
        let digest = sha256_bytes(user_query.as_bytes());
        Self {
            question_id: digest[..12].to_string(),
            user_query: user_query.to_string(),
            extracted_terms: Vec::new(),
            extraction_failure: None,
            evidence: EvidenceBundle::default(),
            candidate_sql: None,
            attempt_count: 0,
            last_error: None,
            status: WorkflowStatus::Pending,
            trail: vec![WorkflowPhase::Start],
            attempts: Vec::new(),
        }
    }

    pub fn transition(&mut self, phase: WorkflowPhase) {
        self.trail.push(phase);
        info!(
            question_id = %self.question_id,
            phase = phase.as_str(),
            status = self.status.as_str(),
            attempt_count = self.attempt_count,
            executions = self.attempts.len(),
            "workflow transition"
        );
    }

    pub fn record_attempt(&mut self, sql: &str, result: &ExecutionResult) {
        self.attempts.push(AttemptRecord {
            sql: sql.to_string(),
            success: result.success,
            error: result.error.clone(),
            row_count: result.row_count,
            duration_ms: result.duration_ms,
        });
    }

    pub fn executions(&self) -> usize {
        self.attempts.len()
    }

    pub fn current_phase(&self) -> WorkflowPhase {
        self.trail.last().copied().unwrap_or(WorkflowPhase::Start)
    }
}
