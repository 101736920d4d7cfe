use crate::evidence::IndexError;

use super::state::WorkflowState;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("evidence index unavailable for question {question_id}")]
    EvidenceUnavailable {
        question_id: String,
        #[source]
        source: IndexError,
    },

    #[error("no working query after {attempts} corrections; last error: {last_error}")]
    RetryBudgetExhausted {
        attempts: usize,
        last_error: String,
        state: Box<WorkflowState>,
    },

    #[error("workflow deadline exceeded before {stage} (elapsed {elapsed_ms:.1} ms > budget {budget_ms} ms)")]
    DeadlineExceeded {
        stage: &'static str,
        elapsed_ms: f64,
        budget_ms: u128,
        state: Box<WorkflowState>,
    },
}

impl WorkflowError {
    pub fn state(&self) -> Option<&WorkflowState> {
        match self {
            Self::EvidenceUnavailable { .. } => None,
            Self::RetryBudgetExhausted { state, .. } | Self::DeadlineExceeded { state, .. } => {
                Some(state.as_ref())
            }
        }
    }
}
