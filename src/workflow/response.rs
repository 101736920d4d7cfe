use serde::Serialize;

use crate::completion::{FinalClassification, ResultKind, ValidationVerdict};
use crate::model::ExecutionResult;
use crate::visualize::{ChartSpec, ChartType, Visualization, visualize};

use super::config::WorkflowConfig;
use super::error::WorkflowError;
use super::orchestrator::WorkflowOutcome;
use super::state::WorkflowStatus;

pub const NO_DATA_TEXT: &str = "No data found for the query.";
pub const UNRESOLVABLE_MESSAGE: &str =
    "This database does not seem to hold the data needed to answer that question.";
pub const GENERATION_FAILED_MESSAGE: &str =
    "I could not turn that question into a query. Please try rephrasing it.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    Text {
        text: String,
    },
    Table {
        columns: Vec<String>,
        rows: Vec<serde_json::Value>,
        total_rows: usize,
    },
    Chart(ChartSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedResponse {
    pub message: String,
    pub insights: String,
    pub body: ResponseBody,
}

pub fn synthesize(
    result: &ExecutionResult,
    classification: Option<&FinalClassification>,
    validation: Option<&ValidationVerdict>,
    config: &WorkflowConfig,
) -> SynthesizedResponse {
    if result.rows.is_empty() {
        return SynthesizedResponse {
            message: "The query ran successfully but matched no rows.".to_string(),
            insights: validation_insight(validation),
            body: ResponseBody::Text {
                text: NO_DATA_TEXT.to_string(),
            },
        };
    }

    let Some(classification) = classification else {
        return SynthesizedResponse {
            message: format!(
                "Query executed successfully! Found {} rows of data.",
                result.row_count
            ),
            insights: validation_insight(validation),
            body: table_body(result, config.table_preview_rows),
        };
    };

    let body = match classification.result_type {
        ResultKind::Chart => chart_body(result, classification.chart_type.as_deref(), config),
        ResultKind::Table => table_body(result, config.table_preview_rows),
        ResultKind::Text => ResponseBody::Text {
            text: text_answer(result),
        },
    };

    let message = if classification.message.trim().is_empty() {
        format!("Found {} results.", result.row_count)
    } else {
        classification.message.trim().to_string()
    };
    let insights = [classification.insights.trim().to_string(), validation_insight(validation)]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<String>>()
        .join("\n");

    SynthesizedResponse {
        message,
        insights,
        body,
    }
}

fn chart_body(result: &ExecutionResult, label: Option<&str>, config: &WorkflowConfig) -> ResponseBody {
    let requested = label.and_then(ChartType::from_label);
    match visualize(result, requested, config.chart_row_cap) {
        Visualization::Chart(spec) => ResponseBody::Chart(spec),
        Visualization::NoData { message } => ResponseBody::Text { text: message },
    }
}

fn table_body(result: &ExecutionResult, preview_rows: usize) -> ResponseBody {
    ResponseBody::Table {
        columns: result.column_names(),
        rows: result.records_json(preview_rows),
        total_rows: result.row_count,
    }
}

pub fn text_answer(result: &ExecutionResult) -> String {
    match (result.rows.as_slice(), result.columns.len()) {
        ([row], 1) => row
            .first()
            .map(|value| value.to_string())
            .unwrap_or_default(),
        ([row], _) => result
            .columns
            .iter()
            .zip(row.iter())
            .map(|(column, value)| format!("{}: {}", column.name, value))
            .collect::<Vec<String>>()
            .join(", "),
        _ => format!("Found {} results", result.row_count),
    }
}

fn validation_insight(validation: Option<&ValidationVerdict>) -> String {
    match validation {
        None => String::new(),
        Some(verdict) if verdict.valid => "Validation: the results match the question.".to_string(),
        Some(verdict) => {
            let mut parts = vec![format!("Validation: {}", verdict.reason.trim())];
            if !verdict.suggestions.trim().is_empty() {
                parts.push(format!("Suggestions: {}", verdict.suggestions.trim()));
            }
            parts.join(" ")
        }
    }
}

pub fn results_for_prompt(result: &ExecutionResult, limit: usize) -> String {
    serde_json::to_string_pretty(&result.records_json(limit)).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResponse {
    pub question: String,
    pub resolvable: bool,
    pub message: String,
    pub result: Option<ResponseBody>,
    pub insights: String,
    pub execution_time: f64,
    pub sql: Option<String>,
    pub row_count: Option<usize>,
    pub validation: Option<ValidationVerdict>,
    pub attempt_count: usize,
    pub status: WorkflowStatus,
    pub error: Option<String>,
}

impl QuestionResponse {
    pub fn from_run(
        question: &str,
        run: &Result<WorkflowOutcome, WorkflowError>,
        execution_time: f64,
    ) -> Self {
        let mut response = Self {
            question: question.to_string(),
            resolvable: true,
            message: String::new(),
            result: None,
            insights: String::new(),
            execution_time,
            sql: None,
            row_count: None,
            validation: None,
            attempt_count: 0,
            status: WorkflowStatus::Pending,
            error: None,
        };

        let state = match run {
            Ok(outcome) => Some(outcome.state()),
            Err(err) => err.state(),
        };
        if let Some(state) = state {
            response.resolvable = state.status != WorkflowStatus::Unresolvable;
            response.sql = state.candidate_sql.clone();
            response.attempt_count = state.attempt_count;
            response.status = state.status;
        }

        match run {
            Ok(WorkflowOutcome::Unresolvable { message, .. }) => {
                response.message = message.clone();
            }
            Ok(WorkflowOutcome::GenerationFailed { message, reason, .. }) => {
                response.message = message.clone();
                response.error = Some(reason.clone());
            }
            Ok(WorkflowOutcome::Succeeded {
                result,
                validation,
                response: synthesized,
                ..
            }) => {
                response.message = synthesized.message.clone();
                response.insights = synthesized.insights.clone();
                response.result = Some(synthesized.body.clone());
                response.row_count = Some(result.row_count);
                response.validation = validation.clone();
            }
            Err(err) => {
                response.error = Some(err.to_string());
                response.message = match err {
                    WorkflowError::EvidenceUnavailable { .. } => {
                        "The search index is unavailable, so the question could not be answered."
                            .to_string()
                    }
                    WorkflowError::RetryBudgetExhausted { attempts, .. } => {
                        format!("I could not produce a working query after {attempts} corrections.")
                    }
                    WorkflowError::DeadlineExceeded { .. } => {
                        "The question took too long to answer.".to_string()
                    }
                };
            }
        }
        response
    }
}
