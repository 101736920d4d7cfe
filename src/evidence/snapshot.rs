use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::{CellValue, IndexedRow};
use crate::semantic::{decode_embedding_blob, encode_embedding_blob};
use crate::util::{now_utc_string, sha256_bytes, write_atomic};

use super::IndexError;
use super::index::VectorIndex;

const INDEX_MAGIC: &[u8; 4] = b"ASKV";
const SNAPSHOT_FORMAT_VERSION: u32 = 2;
const INDEX_HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl SnapshotPaths {
    pub fn from_base(base: &Path) -> Self {
        Self {
            index_path: base.with_extension("index"),
            metadata_path: base.with_extension("meta.json"),
        }
    }

    pub fn both_exist(&self) -> bool {
        self.index_path.is_file() && self.metadata_path.is_file()
    }

    pub fn discard(&self) {
        for path in [&self.index_path, &self.metadata_path] {
            if let Err(err) = fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to remove snapshot artifact");
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSource {
    pub model_id: String,
    pub db_path: String,
    pub db_bytes: u64,
    pub db_modified_ms: u64,
    pub tables: Vec<String>,
}

impl SnapshotSource {
    pub fn describe(db_path: &Path, tables: &[String], model_id: &str) -> Result<Self, IndexError> {
        let file = fs::metadata(db_path).map_err(|err| {
            IndexError::Unavailable(format!("database file missing: {} ({err})", db_path.display()))
        })?;
        let canonical = fs::canonicalize(db_path).unwrap_or_else(|_| db_path.to_path_buf());
        let db_modified_ms = file
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        let mut tables = tables
            .iter()
            .map(|table| table.trim().to_string())
            .filter(|table| !table.is_empty())
            .collect::<Vec<String>>();
        tables.sort();
        tables.dedup();

        Ok(Self {
            model_id: model_id.to_string(),
            db_path: canonical.display().to_string(),
            db_bytes: file.len(),
            db_modified_ms,
            tables,
        })
    }
}

#[derive(Debug)]
pub struct RestoredSnapshot {
    pub index: VectorIndex,
    pub skipped_rows: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMetadata {
    format_version: u32,
    source: SnapshotSource,
    dimensions: usize,
    count: usize,
    skipped_rows: usize,
    index_sha256: String,
    created_at: String,
    rows: Vec<IndexedRow>,
}

pub fn persist(
    index: &VectorIndex,
    skipped_rows: usize,
    source: &SnapshotSource,
    paths: &SnapshotPaths,
) -> Result<(), IndexError> {
    if let Some(row) = index.metadata().iter().find(|row| holds_non_finite_real(row)) {
        return Err(IndexError::Persist(format!(
            "a row of table '{}' holds a non-finite real, which json metadata cannot represent",
            row.source_table
        )));
    }

    let index_blob = encode_index_blob(index);
    let metadata = SnapshotMetadata {
        format_version: SNAPSHOT_FORMAT_VERSION,
        source: source.clone(),
        dimensions: index.dimensions(),
        count: index.len(),
        skipped_rows,
        index_sha256: sha256_bytes(&index_blob),
        created_at: now_utc_string(),
        rows: index.metadata().to_vec(),
    };
    let metadata_blob = serde_json::to_vec(&metadata)
        .map_err(|err| IndexError::Persist(format!("failed to serialize metadata: {err}")))?;

    write_atomic(&paths.index_path, &index_blob)
        .map_err(|err| IndexError::Persist(format!("{err:#}")))?;
    write_atomic(&paths.metadata_path, &metadata_blob)
        .map_err(|err| IndexError::Persist(format!("{err:#}")))?;

    info!(
        index_path = %paths.index_path.display(),
        metadata_path = %paths.metadata_path.display(),
        rows = index.len(),
        "evidence snapshot persisted"
    );
    Ok(())
}

pub fn load(paths: &SnapshotPaths, expected: &SnapshotSource) -> Option<RestoredSnapshot> {
    if !paths.both_exist() {
        return None;
    }

    match read_snapshot(paths, expected) {
        Ok(restored) => {
            info!(
                index_path = %paths.index_path.display(),
                rows = restored.index.len(),
                "evidence snapshot loaded"
            );
            Some(restored)
        }
        Err(err) => {
            warn!(
                index_path = %paths.index_path.display(),
                error = %err,
                "discarding unusable evidence snapshot"
            );
            paths.discard();
            None
        }
    }
}

fn read_snapshot(
    paths: &SnapshotPaths,
    expected: &SnapshotSource,
) -> Result<RestoredSnapshot, IndexError> {
    let index_blob = fs::read(&paths.index_path)?;
    let metadata_blob = fs::read(&paths.metadata_path)?;

    let metadata: SnapshotMetadata = serde_json::from_slice(&metadata_blob)
        .map_err(|err| corrupt(format!("metadata is not valid json: {err}")))?;

    if metadata.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported snapshot format version {}",
            metadata.format_version
        )));
    }
    check_source(&metadata.source, expected)?;
    if sha256_bytes(&index_blob) != metadata.index_sha256 {
        return Err(corrupt("index blob checksum does not match metadata"));
    }
    if metadata.rows.len() != metadata.count {
        return Err(corrupt(format!(
            "metadata lists {} rows but declares {}",
            metadata.rows.len(),
            metadata.count
        )));
    }

    let (dimensions, count, vectors) = decode_index_blob(&index_blob)?;
    if dimensions != metadata.dimensions || count != metadata.count {
        return Err(corrupt(format!(
            "index header ({dimensions} dims, {count} rows) disagrees with metadata ({} dims, {} rows)",
            metadata.dimensions, metadata.count
        )));
    }

    Ok(RestoredSnapshot {
        index: VectorIndex::from_parts(dimensions, vectors, metadata.rows)?,
        skipped_rows: metadata.skipped_rows,
    })
}

fn check_source(stored: &SnapshotSource, expected: &SnapshotSource) -> Result<(), IndexError> {
    if stored.model_id != expected.model_id {
        return Err(stale(format!(
            "built with model '{}', expected '{}'",
            stored.model_id, expected.model_id
        )));
    }
    if stored.db_path != expected.db_path {
        return Err(stale(format!(
            "built from database {}, expected {}",
            stored.db_path, expected.db_path
        )));
    }
    if stored.db_bytes != expected.db_bytes || stored.db_modified_ms != expected.db_modified_ms {
        return Err(stale("database changed since the snapshot was built"));
    }
    if stored.tables != expected.tables {
        return Err(stale(format!(
            "built for tables {:?}, expected {:?}",
            stored.tables, expected.tables
        )));
    }
    Ok(())
}

fn holds_non_finite_real(row: &IndexedRow) -> bool {
    row.field_values
        .iter()
        .any(|field| matches!(field.value, CellValue::Real(value) if !value.is_finite()))
}

fn encode_index_blob(index: &VectorIndex) -> Vec<u8> {
    let vectors = encode_embedding_blob(index.raw_vectors());
    let mut out = Vec::<u8>::with_capacity(INDEX_HEADER_LEN + vectors.len());
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(index.dimensions() as u32).to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    out.extend_from_slice(&vectors);
    out
}

fn decode_index_blob(blob: &[u8]) -> Result<(usize, usize, Vec<f32>), IndexError> {
    if blob.len() < INDEX_HEADER_LEN || &blob[..4] != INDEX_MAGIC {
        return Err(corrupt("index blob header is missing"));
    }

    let version = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(corrupt(format!("unsupported index blob version {version}")));
    }
    let dimensions = u32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]) as usize;
    let mut count_bytes = [0_u8; 8];
    count_bytes.copy_from_slice(&blob[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let expected_values = dimensions.saturating_mul(count);
    let vectors = decode_embedding_blob(&blob[INDEX_HEADER_LEN..], expected_values)
        .ok_or_else(|| corrupt("index blob length does not match its header"))?;
    Ok((dimensions, count, vectors))
}

fn corrupt(reason: impl Into<String>) -> IndexError {
    IndexError::CorruptSnapshot(reason.into())
}

fn stale(reason: impl Into<String>) -> IndexError {
    IndexError::StaleSnapshot(reason.into())
}
