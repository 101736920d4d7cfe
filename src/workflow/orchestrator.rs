use tracing::{debug, info, warn};

use crate::completion::{
    CallSite, CompletionRequest, CompletionService, FinalClassification, ValidationVerdict,
    parse_final, parse_resolvability, parse_sql, parse_terms, parse_validation, prompts,
};
use crate::evidence::{EvidenceBundle, EvidenceSource, IndexError};
use crate::execution::QueryExecutor;
use crate::model::ExecutionResult;

use super::config::{ResolvabilityPolicy, WorkflowConfig};
use super::deadline::{DeadlineExpired, WorkflowDeadline, enforce_deadline};
use super::error::WorkflowError;
use super::response::{
    GENERATION_FAILED_MESSAGE, SynthesizedResponse, UNRESOLVABLE_MESSAGE, results_for_prompt,
    synthesize,
};
use super::state::{WorkflowPhase, WorkflowState, WorkflowStatus};

#[derive(Debug, Clone)]
pub enum WorkflowOutcome {
    Unresolvable {
        state: WorkflowState,
        message: String,
    },
    GenerationFailed {
        state: WorkflowState,
        message: String,
        reason: String,
    },
    Succeeded {
        state: WorkflowState,
        result: ExecutionResult,
        validation: Option<ValidationVerdict>,
        response: SynthesizedResponse,
    },
}

impl WorkflowOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            Self::Unresolvable { state, .. }
            | Self::GenerationFailed { state, .. }
            | Self::Succeeded { state, .. } => state,
        }
    }
}

enum Resolution {
    Resolvable,
    Unresolvable { message: String },
}

pub struct Orchestrator<'a> {
    completion: &'a dyn CompletionService,
    evidence: &'a dyn EvidenceSource,
    executor: &'a dyn QueryExecutor,
    schema: &'a str,
    config: &'a WorkflowConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        completion: &'a dyn CompletionService,
        evidence: &'a dyn EvidenceSource,
        executor: &'a dyn QueryExecutor,
        schema: &'a str,
        config: &'a WorkflowConfig,
    ) -> Self {
        Self {
            completion,
            evidence,
            executor,
            schema,
            config,
        }
    }

    pub fn run(&self, user_query: &str) -> Result<WorkflowOutcome, WorkflowError> {
        let deadline = WorkflowDeadline::new(self.config.deadline);
        let mut state = WorkflowState::new(user_query);
        info!(
            question_id = %state.question_id,
            max_retry_attempts = self.config.max_retry_attempts,
            "workflow started"
        );

        checkpoint(deadline, "term extraction", &state)?;
        state.extracted_terms = match self.extract_terms(user_query) {
            Ok(terms) => terms,
            Err(reason) => {
                warn!(question_id = %state.question_id, reason = %reason, "term extraction degraded to no terms");
                state.extraction_failure = Some(reason);
                Vec::new()
            }
        };
        state.transition(WorkflowPhase::TermsExtracted);

        checkpoint(deadline, "evidence gathering", &state)?;
        state.evidence = self
            .gather_evidence(&state.extracted_terms, user_query)
            .map_err(|source| WorkflowError::EvidenceUnavailable {
                question_id: state.question_id.clone(),
                source,
            })?;
        state.transition(WorkflowPhase::EvidenceGathered);
        let evidence_text = state.evidence.summary(user_query);

        checkpoint(deadline, "resolvability check", &state)?;
        let resolution = self.check_resolvability(user_query, &evidence_text);
        state.transition(WorkflowPhase::ResolvabilityChecked);
        if let Resolution::Unresolvable { message } = resolution {
            state.status = WorkflowStatus::Unresolvable;
            state.transition(WorkflowPhase::Unresolvable);
            return Ok(WorkflowOutcome::Unresolvable { state, message });
        }
        state.status = WorkflowStatus::Resolvable;

        checkpoint(deadline, "query generation", &state)?;
        let draft = self.request_sql(
            CallSite::Generation,
            prompts::generation_prompt(user_query, self.schema, &evidence_text),
        );
        let sql = match draft {
            Ok(sql) => sql,
            Err(reason) => {
                warn!(question_id = %state.question_id, reason = %reason, "query generation failed");
                state.transition(WorkflowPhase::GenerationFailed);
                return Ok(WorkflowOutcome::GenerationFailed {
                    state,
                    message: GENERATION_FAILED_MESSAGE.to_string(),
                    reason,
                });
            }
        };
        state.candidate_sql = Some(sql);
        state.transition(WorkflowPhase::SqlGenerated);

        let result = self.execute_with_corrections(&mut state, &evidence_text, deadline)?;
        state.status = WorkflowStatus::Succeeded;
        state.transition(WorkflowPhase::Succeeded);

        let sql = state.candidate_sql.clone().unwrap_or_default();
        let validation = if self.config.validate_results {
            checkpoint(deadline, "result validation", &state)?;
            self.validate(user_query, &sql, &result)
        } else {
            None
        };

        let classification = if result.rows.is_empty() {
            None
        } else {
            checkpoint(deadline, "response synthesis", &state)?;
            self.classify(user_query, &sql, &result)
        };
        let response = synthesize(&result, classification.as_ref(), validation.as_ref(), self.config);

        info!(
            question_id = %state.question_id,
            attempt_count = state.attempt_count,
            executions = state.executions(),
            row_count = result.row_count,
            "workflow succeeded"
        );
        Ok(WorkflowOutcome::Succeeded {
            state,
            result,
            validation,
            response,
        })
    }

    fn extract_terms(&self, user_query: &str) -> Result<Vec<String>, String> {
        let request = CompletionRequest::for_call_site(
            CallSite::TermExtraction,
            prompts::term_extraction_prompt(user_query),
        );
        let reply = self.completion.complete(&request).map_err(|err| err.to_string())?;
        let terms = parse_terms(&reply).map_err(|err| err.to_string())?;
        Ok(terms
            .into_iter()
            .filter(|term| term.chars().count() >= self.config.min_term_chars)
            .collect())
    }

    fn gather_evidence(&self, terms: &[String], user_query: &str) -> Result<EvidenceBundle, IndexError> {
        let per_term = self.evidence.search_many(terms, self.config.per_term_k)?;
        let whole_query = self.evidence.search(user_query, self.config.whole_query_k)?;
        let bundle = EvidenceBundle {
            per_term,
            whole_query,
        };
        debug!(terms = terms.len(), hits = bundle.hit_count(), "evidence gathered");
        Ok(bundle)
    }

    fn check_resolvability(&self, user_query: &str, evidence_text: &str) -> Resolution {
        let request = CompletionRequest::for_call_site(
            CallSite::Resolvability,
            prompts::resolvability_prompt(user_query, self.schema, evidence_text),
        );
        let verdict = self
            .completion
            .complete(&request)
            .map_err(|err| err.to_string())
            .and_then(|reply| parse_resolvability(&reply).map_err(|err| err.to_string()));

        match verdict {
            Ok(answer) if answer.resolvable => Resolution::Resolvable,
            Ok(answer) => {
                let message = if answer.message.trim().is_empty() {
                    UNRESOLVABLE_MESSAGE.to_string()
                } else {
                    answer.message.trim().to_string()
                };
                Resolution::Unresolvable { message }
            }
            Err(reason) => {
                warn!(
                    reason = %reason,
                    policy = self.config.resolvability_policy.as_str(),
                    "resolvability verdict unreadable"
                );
                match self.config.resolvability_policy {
                    ResolvabilityPolicy::LeanResolvable => Resolution::Resolvable,
                    ResolvabilityPolicy::Strict => Resolution::Unresolvable {
                        message: UNRESOLVABLE_MESSAGE.to_string(),
                    },
                }
            }
        }
    }

    fn request_sql(&self, call_site: CallSite, prompt: String) -> Result<String, String> {
        let request = CompletionRequest::for_call_site(call_site, prompt);
        debug!(call_site = call_site.as_str(), prompt = %request.prompt, "requesting sql");
        let reply = self.completion.complete(&request).map_err(|err| err.to_string())?;
        parse_sql(&reply).map_err(|err| err.to_string())
    }

    fn execute_with_corrections(
        &self,
        state: &mut WorkflowState,
        evidence_text: &str,
        deadline: Option<WorkflowDeadline>,
    ) -> Result<ExecutionResult, WorkflowError> {
        loop {
            checkpoint(deadline, "query execution", state)?;
            let sql = state.candidate_sql.clone().unwrap_or_default();
            state.status = WorkflowStatus::Executing;
            state.transition(WorkflowPhase::Executing);

            let result = self.executor.execute(&sql);
            state.record_attempt(&sql, &result);
            if result.success {
                return Ok(result);
            }

            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "query failed without an error message".to_string());
            state.last_error = Some(error.clone());
            state.transition(WorkflowPhase::SqlFailed);

            if state.attempt_count >= self.config.max_retry_attempts {
                return Err(exhausted(state, error));
            }

            checkpoint(deadline, "query correction", state)?;
            state.transition(WorkflowPhase::Correcting);
            let corrected = self.request_sql(
                CallSite::Correction,
                prompts::correction_prompt(
                    &state.user_query,
                    &sql,
                    &error,
                    self.schema,
                    evidence_text,
                ),
            );
            match corrected {
                Ok(corrected) => {
                    state.attempt_count += 1;
                    state.candidate_sql = Some(corrected);
                    state.transition(WorkflowPhase::SqlGenerated);
                }
                Err(reason) => {
                    warn!(question_id = %state.question_id, reason = %reason, "query correction failed");
                    return Err(exhausted(state, error));
                }
            }
        }
    }

    fn validate(&self, user_query: &str, sql: &str, result: &ExecutionResult) -> Option<ValidationVerdict> {
        let request = CompletionRequest::for_call_site(
            CallSite::Validation,
            prompts::validation_prompt(
                user_query,
                sql,
                &results_for_prompt(result, self.config.final_prompt_rows),
                result.row_count,
            ),
        );
        let verdict = self
            .completion
            .complete(&request)
            .map_err(|err| err.to_string())
            .and_then(|reply| parse_validation(&reply).map_err(|err| err.to_string()));
        match verdict {
            Ok(verdict) => {
                info!(valid = verdict.valid, "advisory validation finished");
                Some(verdict)
            }
            Err(reason) => {
                warn!(reason = %reason, "advisory validation skipped");
                None
            }
        }
    }

    fn classify(&self, user_query: &str, sql: &str, result: &ExecutionResult) -> Option<FinalClassification> {
        let request = CompletionRequest::for_call_site(
            CallSite::FinalClassification,
            prompts::final_prompt(
                user_query,
                sql,
                &results_for_prompt(result, self.config.final_prompt_rows),
                result.row_count,
            ),
        );
        let classification = self
            .completion
            .complete(&request)
            .map_err(|err| err.to_string())
            .and_then(|reply| parse_final(&reply).map_err(|err| err.to_string()));
        match classification {
            Ok(classification) => Some(classification),
            Err(reason) => {
                warn!(reason = %reason, "final classification unavailable, using table response");
                None
            }
        }
    }
}

fn exhausted(state: &mut WorkflowState, last_error: String) -> WorkflowError {
    state.status = WorkflowStatus::Exhausted;
    state.transition(WorkflowPhase::Exhausted);
    WorkflowError::RetryBudgetExhausted {
        attempts: state.attempt_count,
        last_error,
        state: Box::new(state.clone()),
    }
}

fn checkpoint(
    deadline: Option<WorkflowDeadline>,
    stage: &'static str,
    state: &WorkflowState,
) -> Result<(), WorkflowError> {
    enforce_deadline(deadline, stage).map_err(|expired: DeadlineExpired| {
        warn!(
            question_id = %state.question_id,
            stage,
            elapsed_ms = expired.elapsed_ms,
            "workflow deadline exceeded"
        );
        WorkflowError::DeadlineExceeded {
            stage: expired.stage,
            elapsed_ms: expired.elapsed_ms,
            budget_ms: expired.budget_ms,
            state: Box::new(state.clone()),
        }
    })
}
