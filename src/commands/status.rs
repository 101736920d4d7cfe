use std::fs;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::evidence::{list_user_tables, open_corpus_connection, quote_identifier};
use crate::model::IndexBuildManifest;

use super::{build_manifest_path, snapshot_paths};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_path = build_manifest_path(&args.cache_root);
    let snapshot = snapshot_paths(&args.cache_root);

    info!(cache_root = %args.cache_root.display(), "status requested");

    if manifest_path.exists() {
        let raw = fs::read(&manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let manifest: IndexBuildManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?;

        info!(
            run_id = %manifest.run_id,
            generated_at = %manifest.generated_at,
            db_path = %manifest.db_path,
            model_id = %manifest.model_id,
            embedding_dim = manifest.embedding_dim,
            origin = %manifest.origin,
            tables = manifest.tables.len(),
            indexed_rows = manifest.indexed_rows,
            skipped_rows = manifest.skipped_rows,
            duration_ms = manifest.duration_ms,
            warnings = manifest.warnings.len(),
            "loaded index build manifest"
        );
    } else {
        warn!(path = %manifest_path.display(), "index build manifest missing");
    }

    if snapshot.both_exist() {
        let index_bytes = file_len(&snapshot.index_path)?;
        let metadata_bytes = file_len(&snapshot.metadata_path)?;
        info!(
            index_path = %snapshot.index_path.display(),
            index_bytes,
            metadata_bytes,
            "evidence snapshot present"
        );
    } else {
        warn!(
            index_path = %snapshot.index_path.display(),
            metadata_path = %snapshot.metadata_path.display(),
            "evidence snapshot missing"
        );
    }

    let Some(db_path) = args.db_path else {
        return Ok(());
    };
    if !db_path.is_file() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let conn = open_corpus_connection(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let tables = list_user_tables(&conn)
        .with_context(|| format!("failed to list tables in {}", db_path.display()))?;
    for table in &tables {
        let rows = query_count(&conn, table).unwrap_or(0);
        info!(table = %table, rows, "table status");
    }
    info!(path = %db_path.display(), tables = tables.len(), "database status");

    Ok(())
}

fn file_len(path: &std::path::Path) -> Result<u64> {
    let metadata =
        fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(metadata.len())
}

fn query_count(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
    let count = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}
