use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::deadline::{WorkflowDeadline, enforce_deadline};
use super::error::WorkflowError;
use super::orchestrator::WorkflowOutcome;
use super::response::{GENERATION_FAILED_MESSAGE, NO_DATA_TEXT, UNRESOLVABLE_MESSAGE};
use super::state::{WorkflowPhase, WorkflowState, WorkflowStatus};
use super::*;
use crate::completion::{CallSite, CompletionError, CompletionRequest, CompletionService};
use crate::evidence::{EvidenceSource, IndexError, TermEvidence};
use crate::execution::QueryExecutor;
use crate::model::{CellValue, ColumnMeta, EvidenceHit, ExecutionResult, StorageClass};
use crate::visualize::ChartType;

#[derive(Default)]
struct ScriptedCompletion {
    replies: Mutex<HashMap<CallSite, VecDeque<Result<String, CompletionError>>>>,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Option<(CallSite, Duration)>,
}

impl ScriptedCompletion {
    fn reply(self, call_site: CallSite, text: &str) -> Self {
        self.push(call_site, Ok(text.to_string()))
    }

    fn fail(self, call_site: CallSite) -> Self {
        self.push(
            call_site,
            Err(CompletionError::Transport("connection refused".to_string())),
        )
    }

    fn push(self, call_site: CallSite, reply: Result<String, CompletionError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(call_site)
            .or_default()
            .push_back(reply);
        self
    }

    fn calls_to(&self, call_site: CallSite) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.call_site == call_site)
            .cloned()
            .collect()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some((call_site, delay)) = self.delay {
            if call_site == request.call_site {
                std::thread::sleep(delay);
            }
        }
        self.replies
            .lock()
            .unwrap()
            .get_mut(&request.call_site)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Err(CompletionError::EmptyResponse))
    }
}

struct StubEvidence {
    available: bool,
    searched_terms: Mutex<Vec<String>>,
}

impl StubEvidence {
    fn available() -> Self {
        Self {
            available: true,
            searched_terms: Mutex::new(Vec::new()),
        }
    }

    fn broken() -> Self {
        Self {
            available: false,
            searched_terms: Mutex::new(Vec::new()),
        }
    }

    fn hit(text: &str) -> EvidenceHit {
        EvidenceHit {
            position: 0,
            table: "orders".to_string(),
            distance: 0.5,
            similarity_score: 1.0 / 1.5,
            row_preview: format!("region={text}"),
            raw_row: serde_json::json!({ "region": text }),
        }
    }
}

impl EvidenceSource for StubEvidence {
    fn search(&self, text: &str, k: usize) -> Result<Vec<EvidenceHit>, IndexError> {
        if !self.available {
            return Err(IndexError::Unavailable("index missing".to_string()));
        }
        Ok(vec![Self::hit(text)].into_iter().take(k).collect())
    }

    fn search_many(&self, terms: &[String], k: usize) -> Result<Vec<TermEvidence>, IndexError> {
        if !self.available {
            return Err(IndexError::Unavailable("index missing".to_string()));
        }
        self.searched_terms.lock().unwrap().extend(terms.iter().cloned());
        Ok(terms
            .iter()
            .map(|term| TermEvidence {
                term: term.clone(),
                hits: vec![Self::hit(term)].into_iter().take(k).collect(),
            })
            .collect())
    }
}

#[derive(Default)]
struct ScriptedExecutor {
    results: Mutex<VecDeque<ExecutionResult>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn with(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl QueryExecutor for ScriptedExecutor {
    fn execute(&self, sql: &str) -> ExecutionResult {
        self.executed.lock().unwrap().push(sql.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutionResult::failed("no scripted result", 0.0))
    }
}

const SCHEMA: &str = "CREATE TABLE orders (region TEXT, sales REAL, month TEXT);";
const QUESTION: &str = "total sales by region";

fn region_sales() -> ExecutionResult {
    ExecutionResult::succeeded(
        vec![
            ColumnMeta::new("region", Some("TEXT"), StorageClass::Text),
            ColumnMeta::new("sales", Some("REAL"), StorageClass::Real),
        ],
        vec![
            vec![CellValue::Text("north".to_string()), CellValue::Real(120.0)],
            vec![CellValue::Text("south".to_string()), CellValue::Real(80.5)],
        ],
        2,
        1.0,
    )
}

fn happy_path() -> ScriptedCompletion {
    ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "sales, region")
        .reply(CallSite::Resolvability, "RESOLVABLE: yes\nMESSAGE: ok\nREASONING: orders has both")
        .reply(
            CallSite::Generation,
            "```sql\nSELECT region, SUM(sales) AS sales FROM orders GROUP BY region\n```",
        )
}

fn run_with(
    completion: &ScriptedCompletion,
    evidence: &StubEvidence,
    executor: &ScriptedExecutor,
    config: &WorkflowConfig,
) -> Result<WorkflowOutcome, WorkflowError> {
    Orchestrator::new(completion, evidence, executor, SCHEMA, config).run(QUESTION)
}

#[test]
fn missing_column_is_corrected_once() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "sales, region")
        .reply(CallSite::Resolvability, "RESOLVABLE: yes")
        .reply(
            CallSite::Generation,
            "SELECT region, SUM(revenue) FROM orders GROUP BY region",
        )
        .reply(
            CallSite::Correction,
            "SELECT region, SUM(sales) AS sales FROM orders GROUP BY region",
        )
        .reply(
            CallSite::FinalClassification,
            "RESULT_TYPE: chart\nCHART_TYPE: bar\nMESSAGE: Sales by region.\nINSIGHTS: North leads.",
        );
    let executor = ScriptedExecutor::with(vec![
        ExecutionResult::failed("no such column: revenue", 0.4),
        region_sales(),
    ]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    let WorkflowOutcome::Succeeded { state, response, .. } = outcome else {
        panic!("expected success");
    };

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(state.attempt_count, 1);
    assert_eq!(state.executions(), 2);
    assert_eq!(
        state.candidate_sql.as_deref(),
        Some("SELECT region, SUM(sales) AS sales FROM orders GROUP BY region")
    );
    assert_eq!(executor.executed().len(), 2);

    let corrections = completion.calls_to(CallSite::Correction);
    assert_eq!(corrections.len(), 1);
    assert!(corrections[0].prompt.contains("no such column: revenue"));
    assert!(corrections[0].prompt.contains("SUM(revenue)"));

    assert_eq!(response.message, "Sales by region.");
    assert!(response.insights.contains("North leads."));
    match response.body {
        ResponseBody::Chart(spec) => assert_eq!(spec.chart_type, ChartType::Bar),
        other => panic!("expected a chart, got {other:?}"),
    }
}

#[test]
fn exhausted_after_every_correction_fails() {
    let mut completion = happy_path();
    for index in 0..DEFAULT_MAX_RETRY_ATTEMPTS {
        completion = completion.reply(CallSite::Correction, &format!("SELECT broken_{index}"));
    }
    let failures = (0..=DEFAULT_MAX_RETRY_ATTEMPTS)
        .map(|index| ExecutionResult::failed(format!("near \"broken_{index}\": syntax error"), 0.1))
        .collect();
    let executor = ScriptedExecutor::with(failures);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let err = run_with(&completion, &evidence, &executor, &config).expect_err("budget runs out");
    match &err {
        WorkflowError::RetryBudgetExhausted {
            attempts,
            last_error,
            state,
        } => {
            assert_eq!(*attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
            assert_eq!(last_error, "near \"broken_3\": syntax error");
            let last_attempt = state.attempts.last().expect("attempt recorded");
            assert_eq!(last_attempt.sql, "SELECT broken_2");
            assert_eq!(last_attempt.error.as_deref(), Some("near \"broken_3\": syntax error"));
            assert_eq!(state.last_error.as_deref(), Some("near \"broken_3\": syntax error"));
            assert_eq!(state.status, WorkflowStatus::Exhausted);
            assert_eq!(state.executions(), DEFAULT_MAX_RETRY_ATTEMPTS + 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(executor.executed().len(), DEFAULT_MAX_RETRY_ATTEMPTS + 1);
    assert_eq!(
        completion.calls_to(CallSite::Correction).len(),
        DEFAULT_MAX_RETRY_ATTEMPTS
    );

    let response = QuestionResponse::from_run(QUESTION, &Err(err), 0.2);
    assert_eq!(response.status, WorkflowStatus::Exhausted);
    assert_eq!(response.sql.as_deref(), Some("SELECT broken_2"));
    assert_eq!(response.attempt_count, DEFAULT_MAX_RETRY_ATTEMPTS);
    assert!(
        response
            .error
            .as_deref()
            .is_some_and(|error| error.ends_with("near \"broken_3\": syntax error"))
    );
}

#[test]
fn unresolvable_question_never_executes() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "weather, sales")
        .reply(
            CallSite::Resolvability,
            "RESOLVABLE: no\nMESSAGE: There is no weather data in this database.\nREASONING: none",
        );
    let executor = ScriptedExecutor::default();
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run completes");
    let WorkflowOutcome::Unresolvable { state, message } = &outcome else {
        panic!("expected unresolvable");
    };
    assert_eq!(message, "There is no weather data in this database.");
    assert_eq!(state.status, WorkflowStatus::Unresolvable);
    assert!(executor.executed().is_empty());
    assert!(completion.calls_to(CallSite::Generation).is_empty());

    let response = QuestionResponse::from_run(QUESTION, &Ok(outcome), 0.1);
    assert!(!response.resolvable);
    assert!(response.result.is_none());
}

#[test]
fn unresolvable_without_message_uses_the_default_text() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "weather")
        .reply(CallSite::Resolvability, "RESOLVABLE: no");
    let executor = ScriptedExecutor::default();
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run completes");
    let WorkflowOutcome::Unresolvable { message, .. } = outcome else {
        panic!("expected unresolvable");
    };
    assert_eq!(message, UNRESOLVABLE_MESSAGE);
}

#[test]
fn failed_term_extraction_degrades_to_whole_query_evidence() {
    let completion = ScriptedCompletion::default()
        .fail(CallSite::TermExtraction)
        .reply(CallSite::Resolvability, "RESOLVABLE: yes")
        .reply(
            CallSite::Generation,
            "SELECT region, SUM(sales) AS sales FROM orders GROUP BY region",
        )
        .reply(CallSite::FinalClassification, "RESULT_TYPE: table\nMESSAGE: Here you go.");
    let executor = ScriptedExecutor::with(vec![region_sales()]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    let state = outcome.state();
    assert!(state.extracted_terms.is_empty());
    assert!(state.extraction_failure.is_some());
    assert_eq!(state.evidence.whole_query.len(), 1);
    assert!(state.evidence.per_term.is_empty());
    assert!(matches!(outcome, WorkflowOutcome::Succeeded { .. }));
}

#[test]
fn short_terms_are_dropped_before_search() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "id, q1, region, sales")
        .reply(CallSite::Resolvability, "RESOLVABLE: yes")
        .reply(CallSite::Generation, "SELECT region, sales FROM orders")
        .reply(CallSite::FinalClassification, "RESULT_TYPE: table");
    let executor = ScriptedExecutor::with(vec![region_sales()]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    assert_eq!(
        *evidence.searched_terms.lock().unwrap(),
        vec!["region".to_string(), "sales".to_string()]
    );
}

#[test]
fn unavailable_evidence_is_fatal() {
    let completion = happy_path();
    let executor = ScriptedExecutor::default();
    let evidence = StubEvidence::broken();
    let config = WorkflowConfig::default();

    let err = run_with(&completion, &evidence, &executor, &config).expect_err("fatal");
    assert!(matches!(err, WorkflowError::EvidenceUnavailable { .. }));
    assert!(err.state().is_none());
    assert!(completion.calls_to(CallSite::Resolvability).is_empty());
    assert!(executor.executed().is_empty());
}

#[test]
fn empty_generation_ends_without_execution() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "sales")
        .reply(CallSite::Resolvability, "RESOLVABLE: yes")
        .reply(CallSite::Generation, "```sql\n```");
    let executor = ScriptedExecutor::default();
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run completes");
    let WorkflowOutcome::GenerationFailed { state, message, .. } = &outcome else {
        panic!("expected generation failure");
    };
    assert_eq!(message, GENERATION_FAILED_MESSAGE);
    assert!(state.candidate_sql.is_none());
    assert_eq!(state.current_phase(), WorkflowPhase::GenerationFailed);
    assert!(executor.executed().is_empty());

    let response = QuestionResponse::from_run(QUESTION, &Ok(outcome), 0.1);
    assert!(response.resolvable);
    assert_eq!(response.message, GENERATION_FAILED_MESSAGE);
    assert_eq!(response.error.as_deref(), Some("response is empty"));
    assert!(response.result.is_none());
}

#[test]
fn deadline_stops_the_run_between_stages() {
    let completion = ScriptedCompletion {
        delay: Some((CallSite::TermExtraction, Duration::from_millis(120))),
        ..happy_path()
    };
    let executor = ScriptedExecutor::with(vec![region_sales()]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig {
        deadline: Some(Duration::from_millis(50)),
        ..WorkflowConfig::default()
    };

    let err = run_with(&completion, &evidence, &executor, &config).expect_err("deadline hits");
    match err {
        WorkflowError::DeadlineExceeded {
            stage, budget_ms, ..
        } => {
            assert_eq!(stage, "evidence gathering");
            assert_eq!(budget_ms, 50);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(executor.executed().is_empty());
}

#[test]
fn advisory_validation_never_triggers_a_retry() {
    let completion = happy_path()
        .reply(
            CallSite::Validation,
            "VALID: no\nREASON: Totals should be per month.\nSUGGESTIONS: Group by month too.",
        )
        .reply(CallSite::FinalClassification, "RESULT_TYPE: table\nMESSAGE: Totals by region.");
    let executor = ScriptedExecutor::with(vec![region_sales()]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig {
        validate_results: true,
        ..WorkflowConfig::default()
    };

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    let WorkflowOutcome::Succeeded {
        state,
        validation,
        response,
        ..
    } = &outcome
    else {
        panic!("expected success");
    };
    assert_eq!(state.attempt_count, 0);
    assert_eq!(executor.executed().len(), 1);
    assert!(completion.calls_to(CallSite::Correction).is_empty());
    assert!(!validation.as_ref().expect("verdict parsed").valid);
    assert!(response.insights.contains("Group by month too."));

    let record = QuestionResponse::from_run(QUESTION, &Ok(outcome), 0.3);
    let verdict = record.validation.expect("verdict in the record");
    assert_eq!(verdict.reason, "Totals should be per month.");
    assert_eq!(record.row_count, Some(region_sales().row_count));
    assert!(record.error.is_none());
}

#[test]
fn strict_policy_rejects_unreadable_verdicts() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "sales")
        .reply(CallSite::Resolvability, "I think maybe?");
    let executor = ScriptedExecutor::default();
    let evidence = StubEvidence::available();
    let config = WorkflowConfig {
        resolvability_policy: ResolvabilityPolicy::Strict,
        ..WorkflowConfig::default()
    };

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run completes");
    let WorkflowOutcome::Unresolvable { message, .. } = outcome else {
        panic!("expected unresolvable");
    };
    assert_eq!(message, UNRESOLVABLE_MESSAGE);
    assert!(executor.executed().is_empty());
}

#[test]
fn lean_policy_passes_unreadable_verdicts() {
    let completion = ScriptedCompletion::default()
        .reply(CallSite::TermExtraction, "sales")
        .reply(CallSite::Resolvability, "I think maybe?")
        .reply(CallSite::Generation, "SELECT 1")
        .reply(CallSite::FinalClassification, "RESULT_TYPE: text\nMESSAGE: One.");
    let executor = ScriptedExecutor::with(vec![ExecutionResult::succeeded(
        vec![ColumnMeta::new("1", None, StorageClass::Integer)],
        vec![vec![CellValue::Integer(1)]],
        1,
        0.1,
    )]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    let WorkflowOutcome::Succeeded { response, .. } = outcome else {
        panic!("expected success");
    };
    assert_eq!(
        response.body,
        ResponseBody::Text {
            text: "1".to_string()
        }
    );
}

#[test]
fn failed_classification_falls_back_to_a_table() {
    let completion = happy_path().fail(CallSite::FinalClassification);
    let executor = ScriptedExecutor::with(vec![region_sales()]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    let WorkflowOutcome::Succeeded { response, .. } = outcome else {
        panic!("expected success");
    };
    assert_eq!(response.message, "Query executed successfully! Found 2 rows of data.");
    match response.body {
        ResponseBody::Table {
            columns,
            rows,
            total_rows,
        } => {
            assert_eq!(columns, vec!["region".to_string(), "sales".to_string()]);
            assert_eq!(rows.len(), 2);
            assert_eq!(total_rows, 2);
        }
        other => panic!("expected a table, got {other:?}"),
    }
}

#[test]
fn zero_rows_reports_no_data() {
    let completion = happy_path();
    let executor = ScriptedExecutor::with(vec![ExecutionResult::succeeded(
        vec![ColumnMeta::new("region", Some("TEXT"), StorageClass::Empty)],
        Vec::new(),
        0,
        0.2,
    )]);
    let evidence = StubEvidence::available();
    let config = WorkflowConfig::default();

    let outcome = run_with(&completion, &evidence, &executor, &config).expect("run succeeds");
    let WorkflowOutcome::Succeeded { response, .. } = outcome else {
        panic!("expected success");
    };
    assert_eq!(
        response.body,
        ResponseBody::Text {
            text: NO_DATA_TEXT.to_string()
        }
    );
    assert!(completion.calls_to(CallSite::FinalClassification).is_empty());
}

#[test]
fn question_ids_are_stable() {
    let first = WorkflowState::new(QUESTION);
    let second = WorkflowState::new(QUESTION);
    assert_eq!(first.question_id, second.question_id);
    assert_eq!(first.question_id.len(), 12);
    assert_ne!(first.question_id, WorkflowState::new("other").question_id);
}

#[test]
fn zero_budget_disables_the_deadline() {
    assert!(WorkflowDeadline::new(Some(Duration::ZERO)).is_none());
    assert!(enforce_deadline(None, "anything").is_ok());
    let deadline = WorkflowDeadline::new(Some(Duration::from_secs(60))).expect("deadline");
    assert!(deadline.enforce("query execution").is_ok());
}
