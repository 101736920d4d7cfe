use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cli::{AskArgs, ResolvabilityMode};
use crate::completion::{CompletionClientConfig, HttpCompletionClient};
use crate::evidence::{EvidenceLoadRequest, SharedEvidence, load_or_build};
use crate::execution::{DEFAULT_PREVIEW_LIMIT, ReadPool, SqliteExecutor};
use crate::schema::describe_schema;
use crate::workflow::{
    Orchestrator, QuestionResponse, ResolvabilityPolicy, ResponseBody, WorkflowConfig,
};

use super::{local_embedder, snapshot_paths};

pub fn run(args: AskArgs) -> Result<()> {
    reject_blank_queries(&args.queries)?;
    let config = workflow_config(&args);
    info!(
        questions = args.queries.len(),
        pool_size = args.pool_size,
        max_retry_attempts = config.max_retry_attempts,
        resolvability = args.resolvability.as_str(),
        validate = config.validate_results,
        deadline_ms = args.deadline_ms,
        "ask requested"
    );

    let pool = ReadPool::open(&args.db_path, args.pool_size)
        .with_context(|| format!("failed to open database {}", args.db_path.display()))?;
    let schema = pool
        .with_conn(|connection| describe_schema(connection, args.schema_path.as_deref()))
        .context("failed to read database schema")??;
    let workers = pool.size();
    info!(db_path = %pool.path().display(), connections = workers, "read pool opened");
    let executor = SqliteExecutor::new(pool, DEFAULT_PREVIEW_LIMIT);

    let request = EvidenceLoadRequest {
        db_path: args.db_path.clone(),
        snapshot: snapshot_paths(&args.cache_root),
        tables: Vec::new(),
        force_rebuild: false,
    };
    let embedder = local_embedder(&args.model_id);
    let evidence = SharedEvidence::lazy(move || {
        let loaded = load_or_build(&request, embedder.clone())?;
        for warning in &loaded.warnings {
            warn!(warning = %warning, "evidence load warning");
        }
        info!(
            origin = loaded.origin.as_str(),
            rows = loaded.engine.index().len(),
            duration_ms = loaded.duration_ms,
            "evidence ready"
        );
        Ok(loaded.engine)
    });

    let completion = HttpCompletionClient::new(CompletionClientConfig {
        base_url: args.completion_url.clone(),
        model: args.completion_model.clone(),
        api_key: args.completion_api_key.clone(),
        timeout: Some(Duration::from_secs(args.completion_timeout_secs)),
    })
    .context("failed to build completion client")?;
    info!(model = completion.model(), url = %completion.chat_url(), "completion client ready");

    let orchestrator = Orchestrator::new(&completion, &evidence, &executor, &schema, &config);
    let threads = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.min(args.queries.len()).max(1))
        .build()
        .context("failed to build question worker pool")?;

    let runs = threads.install(|| {
        args.queries
            .par_iter()
            .map(|question| {
                let started = Instant::now();
                let run = orchestrator.run(question);
                if let Err(err) = &run {
                    warn!(question = %question, error = %err, "question failed");
                }
                let response =
                    QuestionResponse::from_run(question, &run, started.elapsed().as_secs_f64());
                (response, run.is_err())
            })
            .collect::<Vec<(QuestionResponse, bool)>>()
    });

    let failed = runs.iter().filter(|(_, failed)| *failed).count();
    let responses = runs
        .into_iter()
        .map(|(response, _)| response)
        .collect::<Vec<QuestionResponse>>();

    if args.json {
        write_json_response(&responses)?;
    } else {
        write_text_response(&responses)?;
    }

    info!(
        questions = responses.len(),
        failed,
        evidence_loaded = evidence.is_initialized(),
        "ask completed"
    );
    if failed > 0 {
        bail!("{failed} of {} questions failed", responses.len());
    }
    Ok(())
}

fn reject_blank_queries(queries: &[String]) -> Result<()> {
    if let Some(position) = queries.iter().position(|query| query.trim().is_empty()) {
        bail!("--query #{} is empty", position + 1);
    }
    Ok(())
}

fn workflow_config(args: &AskArgs) -> WorkflowConfig {
    WorkflowConfig {
        max_retry_attempts: args.max_retry_attempts,
        per_term_k: args.per_term_k,
        whole_query_k: args.whole_query_k,
        chart_row_cap: args.chart_row_cap,
        table_preview_rows: args.table_preview_rows,
        resolvability_policy: match args.resolvability {
            ResolvabilityMode::Lean => ResolvabilityPolicy::LeanResolvable,
            ResolvabilityMode::Strict => ResolvabilityPolicy::Strict,
        },
        validate_results: args.validate,
        deadline: Some(Duration::from_millis(args.deadline_ms)).filter(|budget| !budget.is_zero()),
        ..WorkflowConfig::default()
    }
}

fn write_json_response(responses: &[QuestionResponse]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, responses)
        .context("failed to serialize ask json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(responses: &[QuestionResponse]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    for (index, response) in responses.iter().enumerate() {
        if index > 0 {
            writeln!(output)?;
        }
        writeln!(output, "Question: {}", response.question)?;
        writeln!(
            output,
            "Status: {} resolvable={} attempts={} time={:.2}s",
            response.status.as_str(),
            response.resolvable,
            response.attempt_count,
            response.execution_time,
        )?;
        writeln!(output, "Message: {}", response.message)?;
        if let Some(sql) = &response.sql {
            writeln!(output, "SQL: {}", sql.replace('\n', " "))?;
        }

        match &response.result {
            Some(ResponseBody::Text { text }) => writeln!(output, "Answer: {text}")?,
            Some(ResponseBody::Table {
                columns,
                rows,
                total_rows,
            }) => {
                writeln!(
                    output,
                    "Table: {} (showing {} of {} rows)",
                    columns.join(" | "),
                    rows.len(),
                    total_rows
                )?;
                for row in rows {
                    writeln!(output, "  {row}")?;
                }
            }
            Some(ResponseBody::Chart(spec)) => {
                writeln!(
                    output,
                    "Chart: {} \"{}\" series={} plotted_rows={} source_rows={}",
                    spec.chart_type,
                    spec.layout_hints.title,
                    spec.series.len(),
                    spec.plotted_rows,
                    spec.source_rows,
                )?;
                if let Some(reason) = &spec.fallback_reason {
                    writeln!(output, "  fallback: {reason}")?;
                }
            }
            None => {}
        }

        if !response.insights.is_empty() {
            writeln!(output, "Insights: {}", response.insights)?;
        }
        if let Some(error) = &response.error {
            writeln!(output, "Error: {error}")?;
        }
    }

    output.flush()?;
    Ok(())
}
