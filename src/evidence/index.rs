use crate::model::IndexedRow;
use crate::semantic::squared_l2_distance;

use super::IndexError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimensions: usize,
    vectors: Vec<f32>,
    metadata: Vec<IndexedRow>,
}

impl VectorIndex {
    pub fn from_parts(
        dimensions: usize,
        vectors: Vec<f32>,
        metadata: Vec<IndexedRow>,
    ) -> Result<Self, IndexError> {
        if metadata.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }
        if dimensions == 0 || vectors.len() != dimensions.saturating_mul(metadata.len()) {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions.saturating_mul(metadata.len()),
                actual: vectors.len(),
            });
        }

        Ok(Self {
            dimensions,
            vectors,
            metadata,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn metadata(&self) -> &[IndexedRow] {
        &self.metadata
    }

    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// The `k` closest positions, ascending by distance, ties by insertion order.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = self
            .vectors
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2_distance(query, vector),
            })
            .collect::<Vec<Neighbor>>();

        if k < scored.len() {
            scored.select_nth_unstable_by(k, compare_neighbors);
            scored.truncate(k);
        }
        scored.sort_by(compare_neighbors);
        Ok(scored)
    }
}

fn compare_neighbors(left: &Neighbor, right: &Neighbor) -> std::cmp::Ordering {
    left.distance
        .total_cmp(&right.distance)
        .then(left.position.cmp(&right.position))
}
