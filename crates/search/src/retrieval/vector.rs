//! Vector similarity retrieval over the active index

use super::{by_score, deduplicate, RetrievedPassage};
use clearpath_common::errors::Result;
use clearpath_common::index::IndexHandle;
use std::sync::Arc;

/// Nearest-neighbour retriever with a similarity floor and deduplication
pub struct VectorRetriever {
    index: Arc<IndexHandle>,
    dedup_threshold: f32,
}

impl VectorRetriever {
    pub fn new(index: Arc<IndexHandle>, dedup_threshold: f32) -> Self {
        Self {
            index,
            dedup_threshold,
        }
    }

    /// Up to `k` passages scoring at least `threshold`, near-duplicates
    /// removed, ordered by score descending.
    ///
    /// An index failure is returned as is; it is fatal for the request.
    pub fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedPassage>> {
        // One snapshot for the whole call, so search and lookup agree
        let index = self.index.snapshot();
        let neighbors = index.search(query_embedding, k)?;
        let candidates = neighbors.len();

        let mut passages = Vec::with_capacity(candidates);
        for (rank, neighbor) in neighbors.into_iter().enumerate() {
            // Negated comparison also drops NaN scores
            if neighbor.is_no_match() || !(neighbor.score >= threshold) {
                continue;
            }
            match index.lookup(neighbor.id) {
                Some(chunk) => passages.push(RetrievedPassage::new(chunk, neighbor.score, rank)),
                None => {
                    tracing::warn!(chunk_id = %neighbor.id, "Search hit missing from index metadata");
                }
            }
        }
        let above_threshold = passages.len();

        let mut passages = deduplicate(passages, self.dedup_threshold);
        passages.sort_by(by_score);

        tracing::debug!(
            k,
            threshold,
            candidates,
            above_threshold,
            returned = passages.len(),
            "Retrieval complete"
        );
        Ok(passages)
    }
}
