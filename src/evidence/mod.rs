mod corpus;
mod engine;
mod index;
mod shared;
mod snapshot;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{EvidenceHit, TableRowCount};
use crate::semantic::Embedder;

use corpus::load_corpus_rows;
use snapshot::SnapshotSource;

pub use corpus::{list_user_tables, quote_identifier};
pub use engine::{EvidenceEngine, MIN_TERM_CHARS};
pub use shared::SharedEvidence;
pub use snapshot::SnapshotPaths;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("no embeddable rows found in the corpus")]
    EmptyCorpus,

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt evidence snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("stale evidence snapshot: {0}")]
    StaleSnapshot(String),

    #[error("failed to persist evidence snapshot: {0}")]
    Persist(String),

    #[error("evidence index unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub trait EvidenceSource: Send + Sync {
    fn search(&self, text: &str, k: usize) -> Result<Vec<EvidenceHit>, IndexError>;
    fn search_many(&self, terms: &[String], k: usize) -> Result<Vec<TermEvidence>, IndexError>;
}

impl EvidenceSource for EvidenceEngine {
    fn search(&self, text: &str, k: usize) -> Result<Vec<EvidenceHit>, IndexError> {
        EvidenceEngine::search(self, text, k)
    }

    fn search_many(&self, terms: &[String], k: usize) -> Result<Vec<TermEvidence>, IndexError> {
        EvidenceEngine::search_many(self, terms, k)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TermEvidence {
    pub term: String,
    pub hits: Vec<EvidenceHit>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvidenceBundle {
    pub per_term: Vec<TermEvidence>,
    pub whole_query: Vec<EvidenceHit>,
}

impl EvidenceBundle {
    pub fn hit_count(&self) -> usize {
        self.whole_query.len() + self.per_term.iter().map(|term| term.hits.len()).sum::<usize>()
    }

    pub fn summary(&self, user_query: &str) -> String {
        let mut parts = Vec::<String>::new();
        for term in &self.per_term {
            parts.push(format!("{}:", term.term));
            parts.push(render_hits(&term.hits));
            parts.push(String::new());
        }
        parts.push(format!("{user_query}:"));
        parts.push(render_hits(&self.whole_query));
        parts.join("\n")
    }
}

fn render_hits(hits: &[EvidenceHit]) -> String {
    let rendered = hits
        .iter()
        .map(|hit| {
            serde_json::json!({
                "table": hit.table,
                "similarity_score": (hit.similarity_score * 10_000.0).round() / 10_000.0,
                "data": hit.raw_row,
            })
        })
        .collect::<Vec<serde_json::Value>>();
    serde_json::to_string_pretty(&rendered).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrigin {
    Snapshot,
    Rebuilt,
}

impl LoadOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Rebuilt => "rebuilt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvidenceLoadRequest {
    pub db_path: PathBuf,
    pub snapshot: SnapshotPaths,
    pub tables: Vec<String>,
    pub force_rebuild: bool,
}

pub struct LoadedEvidence {
    pub engine: EvidenceEngine,
    pub origin: LoadOrigin,
    pub tables: Vec<TableRowCount>,
    pub warnings: Vec<String>,
    pub duration_ms: u128,
}

pub fn load_or_build(
    request: &EvidenceLoadRequest,
    embedder: Arc<dyn Embedder>,
) -> Result<LoadedEvidence, IndexError> {
    let started = Instant::now();
    let source = SnapshotSource::describe(&request.db_path, &request.tables, embedder.model_id())?;

    if !request.force_rebuild {
        if let Some(restored) = snapshot::load(&request.snapshot, &source) {
            let tables = count_indexed_tables(restored.index.metadata());
            let engine = EvidenceEngine::from_index(restored.index, restored.skipped_rows, embedder)?;
            return Ok(LoadedEvidence {
                engine,
                origin: LoadOrigin::Snapshot,
                tables,
                warnings: Vec::new(),
                duration_ms: started.elapsed().as_millis(),
            });
        }
    }

    let connection = open_corpus_connection(&request.db_path)?;
    let corpus = load_corpus_rows(&connection, &request.tables)?;
    let mut tables = corpus.tables;
    let engine = EvidenceEngine::build(corpus.rows, embedder)?;

    for table in &mut tables {
        table.rows_embedded = engine
            .index()
            .metadata()
            .iter()
            .filter(|row| row.source_table == table.table)
            .count();
    }

    let mut warnings = Vec::<String>::new();
    if let Err(err) = snapshot::persist(
        engine.index(),
        engine.skipped_rows(),
        &source,
        &request.snapshot,
    ) {
        warn!(error = %err, "evidence snapshot save failed");
        warnings.push(err.to_string());
    }

    info!(
        db_path = %request.db_path.display(),
        rows = engine.index().len(),
        "evidence index rebuilt from database"
    );

    Ok(LoadedEvidence {
        engine,
        origin: LoadOrigin::Rebuilt,
        tables,
        warnings,
        duration_ms: started.elapsed().as_millis(),
    })
}

pub fn open_corpus_connection(db_path: &Path) -> Result<Connection, IndexError> {
    if !db_path.is_file() {
        return Err(IndexError::Unavailable(format!(
            "database file missing: {}",
            db_path.display()
        )));
    }
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(connection)
}

fn count_indexed_tables(rows: &[crate::model::IndexedRow]) -> Vec<TableRowCount> {
    let mut out = Vec::<TableRowCount>::new();
    for row in rows {
        match out.iter_mut().find(|entry| entry.table == row.source_table) {
            Some(entry) => {
                entry.rows_read += 1;
                entry.rows_embedded += 1;
            }
            None => out.push(TableRowCount {
                table: row.source_table.clone(),
                rows_read: 1,
                rows_embedded: 1,
            }),
        }
    }
    out
}
