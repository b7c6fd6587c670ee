//! Exact inner-product index over all records

use super::{ChunkRecord, Neighbor, VectorIndex};
use crate::embeddings::l2_normalize;
use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Brute-force index: every query is scored against every record.
#[derive(Debug, Default)]
pub struct FlatIndex {
    dimension: usize,
    records: Vec<Arc<ChunkRecord>>,
    positions: HashMap<Uuid, usize>,
}

impl FlatIndex {
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build an index, validating every record's embedding dimension.
    /// Embeddings are L2-normalized so scores stay cosine similarities.
    pub fn build(dimension: usize, records: Vec<ChunkRecord>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(records.len());
        let mut stored = Vec::with_capacity(records.len());

        for (position, mut record) in records.into_iter().enumerate() {
            if record.embedding.len() != dimension {
                return Err(AppError::validation(
                    "embedding",
                    format!(
                        "Chunk {} has a {}-dimensional embedding, index expects {}",
                        record.id,
                        record.embedding.len(),
                        dimension
                    ),
                ));
            }
            if !record.embedding.iter().all(|v| v.is_finite()) {
                return Err(AppError::validation(
                    "embedding",
                    format!("Chunk {} has a non-finite embedding value", record.id),
                ));
            }
            if record.id.is_nil() {
                return Err(AppError::validation("id", "Chunk id must not be the nil UUID"));
            }
            if positions.insert(record.id, position).is_some() {
                return Err(AppError::validation(
                    "id",
                    format!("Duplicate chunk id {}", record.id),
                ));
            }
            l2_normalize(&mut record.embedding);
            stored.push(Arc::new(record));
        }

        Ok(Self {
            dimension,
            records: stored,
            positions,
        })
    }

    /// All records in insertion order
    pub fn records(&self) -> &[Arc<ChunkRecord>] {
        &self.records
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(AppError::IndexUnavailable {
                message: format!(
                    "Query vector has dimension {}, index expects {}",
                    query.len(),
                    self.dimension
                ),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .records
            .iter()
            .map(|r| Neighbor {
                id: r.id,
                score: dot(query, &r.embedding),
            })
            .collect();

        // Stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    fn lookup(&self, id: Uuid) -> Option<Arc<ChunkRecord>> {
        self.positions.get(&id).map(|&p| Arc::clone(&self.records[p]))
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
