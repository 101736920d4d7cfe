use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::SearchArgs;
use crate::evidence::{EvidenceLoadRequest, TermEvidence, load_or_build};
use crate::model::EvidenceHit;

use super::{local_embedder, snapshot_paths};

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: Option<String>,
    k: usize,
    index_origin: &'static str,
    indexed_rows: usize,
    whole_query: Vec<EvidenceHit>,
    per_term: Vec<TermEvidence>,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let query = args
        .query
        .as_deref()
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .map(str::to_string);
    if query.is_none() && args.terms.is_empty() {
        bail!("search needs --query or at least one --term");
    }

    let request = EvidenceLoadRequest {
        db_path: args.db_path.clone(),
        snapshot: snapshot_paths(&args.cache_root),
        tables: Vec::new(),
        force_rebuild: false,
    };
    let loaded = load_or_build(&request, local_embedder(&args.model_id))
        .with_context(|| format!("failed to load evidence index for {}", args.db_path.display()))?;

    let whole_query = match &query {
        Some(query) => loaded
            .engine
            .search(query, args.k)
            .context("whole-query search failed")?,
        None => Vec::new(),
    };
    let per_term = loaded
        .engine
        .search_many(&args.terms, args.k)
        .context("per-term search failed")?;

    info!(
        k = args.k,
        origin = loaded.origin.as_str(),
        whole_query_hits = whole_query.len(),
        terms_with_hits = per_term.len(),
        "search completed"
    );

    let response = SearchResponse {
        query,
        k: args.k,
        index_origin: loaded.origin.as_str(),
        indexed_rows: loaded.engine.index().len(),
        whole_query,
        per_term,
    };

    if args.json {
        write_json_response(&response)
    } else {
        write_text_response(&response)
    }
}

fn write_json_response(response: &SearchResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize search json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(response: &SearchResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(
        output,
        "Index: origin={} rows={} k={}",
        response.index_origin, response.indexed_rows, response.k
    )?;

    if let Some(query) = &response.query {
        writeln!(output, "Query: {query}")?;
        write_hits(&mut output, &response.whole_query)?;
    }
    for term in &response.per_term {
        writeln!(output, "Term: {}", term.term)?;
        write_hits(&mut output, &term.hits)?;
    }

    output.flush()?;
    Ok(())
}

fn write_hits(output: &mut impl Write, hits: &[EvidenceHit]) -> Result<()> {
    if hits.is_empty() {
        writeln!(output, "  (no hits)")?;
    }
    for (rank, hit) in hits.iter().enumerate() {
        writeln!(
            output,
            "  {}. [{}] score={:.4} {}",
            rank + 1,
            hit.table,
            hit.similarity_score,
            hit.row_preview
        )?;
    }
    Ok(())
}
