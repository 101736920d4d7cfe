use std::sync::Arc;

use tracing::{debug, info};

use crate::model::{EvidenceHit, IndexedRow};
use crate::semantic::{Embedder, row_payload_for_embedding, similarity_from_distance};

use super::index::VectorIndex;
use super::{IndexError, TermEvidence};

pub const MIN_TERM_CHARS: usize = 3;
const PREVIEW_MAX_FIELDS: usize = 8;
const PREVIEW_MAX_VALUE_CHARS: usize = 80;

pub struct EvidenceEngine {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    skipped_rows: usize,
}

impl EvidenceEngine {
    pub fn build(rows: Vec<IndexedRow>, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let dimensions = embedder.dimensions();
        let mut vectors = Vec::<f32>::with_capacity(rows.len() * dimensions);
        let mut metadata = Vec::<IndexedRow>::with_capacity(rows.len());
        let mut skipped_rows = 0usize;

        for row in rows {
            let Some(payload) = row_payload_for_embedding(&row) else {
                skipped_rows += 1;
                continue;
            };
            let vector = embedder.embed(&payload);
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            vectors.extend_from_slice(&vector);
            metadata.push(row);
        }

        if metadata.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }

        let index = VectorIndex::from_parts(dimensions, vectors, metadata)?;
        info!(
            model_id = %embedder.model_id(),
            indexed_rows = index.len(),
            skipped_rows,
            dimensions,
            "evidence index built"
        );

        Ok(Self {
            index,
            embedder,
            skipped_rows,
        })
    }

    pub fn from_index(
        index: VectorIndex,
        skipped_rows: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        if index.dimensions() != embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: embedder.dimensions(),
                actual: index.dimensions(),
            });
        }
        Ok(Self {
            index,
            embedder,
            skipped_rows,
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub fn search(&self, text: &str, k: usize) -> Result<Vec<EvidenceHit>, IndexError> {
        let query = self.embedder.embed(text);
        let neighbors = self.index.nearest(&query, k)?;
        let metadata = self.index.metadata();

        let mut out = Vec::<EvidenceHit>::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(row) = metadata.get(neighbor.position) else {
                continue;
            };
            out.push(EvidenceHit {
                position: neighbor.position,
                table: row.source_table.clone(),
                distance: neighbor.distance,
                similarity_score: similarity_from_distance(neighbor.distance),
                row_preview: row.preview(PREVIEW_MAX_FIELDS, PREVIEW_MAX_VALUE_CHARS),
                raw_row: row.to_json_object(),
            });
        }

        debug!(k, returned = out.len(), "evidence search");
        Ok(out)
    }

    pub fn search_many(&self, terms: &[String], k: usize) -> Result<Vec<TermEvidence>, IndexError> {
        let mut out = Vec::<TermEvidence>::new();
        for term in terms {
            let trimmed = term.trim();
            if trimmed.chars().count() < MIN_TERM_CHARS {
                continue;
            }
            if out.iter().any(|existing| existing.term == trimmed) {
                continue;
            }

            let hits = self.search(trimmed, k)?;
            if !hits.is_empty() {
                out.push(TermEvidence {
                    term: trimmed.to_string(),
                    hits,
                });
            }
        }
        Ok(out)
    }
}
