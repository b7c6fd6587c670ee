//! Passage retrieval
//!
//! - Vector search with a similarity floor
//! - Near-duplicate removal (character-level Jaccard)
//! - Source-name keyword re-ranking

mod dedup;
mod rerank;
mod vector;

pub use dedup::{char_jaccard, deduplicate};
pub use rerank::Reranker;
pub use vector::VectorRetriever;

use clearpath_common::index::ChunkRecord;
use std::cmp::Ordering;
use std::sync::Arc;

/// A chunk selected for a query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    /// Shared, read-only chunk from the active index
    pub chunk: Arc<ChunkRecord>,

    /// Inner-product score reported by the index
    pub similarity: f32,

    /// Current ranking score (similarity plus any re-rank boost)
    pub score: f32,

    /// Position in the index's result list, used to break score ties
    pub retrieval_rank: usize,

    /// Whether the re-rank boost has been applied
    pub boosted: bool,
}

impl RetrievedPassage {
    pub fn new(chunk: Arc<ChunkRecord>, similarity: f32, retrieval_rank: usize) -> Self {
        Self {
            chunk,
            similarity,
            score: similarity,
            retrieval_rank,
            boosted: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.chunk.text
    }

    pub fn source_file(&self) -> &str {
        &self.chunk.source_file
    }
}

/// Score descending, then retrieval rank
pub(crate) fn by_score(a: &RetrievedPassage, b: &RetrievedPassage) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.retrieval_rank.cmp(&b.retrieval_rank))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use uuid::Uuid;

    pub fn passage(text: &str, source_file: &str, score: f32, rank: usize) -> RetrievedPassage {
        let chunk = ChunkRecord {
            id: Uuid::new_v4(),
            text: text.to_string(),
            source_file: source_file.to_string(),
            page_number: 1,
            chunk_index: rank as u32,
            embedding: Vec::new(),
        };
        RetrievedPassage::new(Arc::new(chunk), score, rank)
    }
}
