//! Vector index boundary
//!
//! The query path only needs two capabilities from the index:
//! nearest-neighbour search by inner product and metadata lookup by id.
//! Chunk records are produced by the ingestion subsystem and are
//! read-only here.
//!
//! The active index is shared as an immutable `Arc` snapshot. Re-indexing
//! builds a complete replacement and swaps it in one step, so a reader
//! sees either the old or the new index and never a partial one.

mod flat;
mod snapshot;

pub use flat::FlatIndex;
pub use snapshot::{load_snapshot, persist_snapshot, IndexSnapshot};

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A bounded span of document text with its precomputed embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable chunk identity
    pub id: Uuid,

    /// Chunk text
    pub text: String,

    /// Source document name (e.g. `pricing_guide.pdf`)
    pub source_file: String,

    /// 1-indexed page the chunk starts on
    pub page_number: u32,

    /// Position of the chunk within its document
    #[serde(default)]
    pub chunk_index: u32,

    /// L2-normalized embedding
    pub embedding: Vec<f32>,
}

/// One search hit: a chunk id and its inner-product score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub score: f32,
}

impl Neighbor {
    /// Id reported by an index when a slot has no match
    pub const NO_MATCH: Uuid = Uuid::nil();

    pub fn is_no_match(&self) -> bool {
        self.id == Self::NO_MATCH
    }
}

/// Nearest-neighbour search and metadata lookup
pub trait VectorIndex: Send + Sync {
    /// Up to `k` neighbours ordered by score descending
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Chunk metadata for an id returned by `search`
    fn lookup(&self, id: Uuid) -> Option<Arc<ChunkRecord>>;

    /// Number of indexed chunks
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimension the index was built for
    fn dimension(&self) -> usize;
}

/// Shared handle to the active index
pub struct IndexHandle {
    current: RwLock<Arc<dyn VectorIndex>>,
    reindex: Mutex<()>,
    dimension: usize,
}

impl IndexHandle {
    /// Create a handle around an empty flat index
    pub fn empty(dimension: usize) -> Self {
        Self::with_index(Arc::new(FlatIndex::empty(dimension)))
    }

    /// Create a handle around an existing index
    pub fn with_index(index: Arc<dyn VectorIndex>) -> Self {
        let dimension = index.dimension();
        Self {
            current: RwLock::new(index),
            reindex: Mutex::new(()),
            dimension,
        }
    }

    /// Load the persisted snapshot, or start empty if none exists
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        let index = load_snapshot(path, dimension).await?;
        Ok(Self::with_index(Arc::new(index)))
    }

    /// The index every new read should use
    pub fn snapshot(&self) -> Arc<dyn VectorIndex> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of chunks in the active index
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a new index from `records` and swap it in.
    ///
    /// Only one re-index may run at a time; a concurrent call fails with
    /// `Conflict` instead of queueing. Reads continue against the previous
    /// index until the swap. When `persist_to` is set the snapshot is
    /// written before the swap, so a failed write leaves the old index active.
    pub async fn replace(
        &self,
        records: Vec<ChunkRecord>,
        persist_to: Option<&Path>,
    ) -> Result<usize> {
        let _guard = self.reindex.try_lock().map_err(|_| AppError::Conflict {
            message: "An index update is already in progress".to_string(),
        })?;

        let index = FlatIndex::build(self.dimension, records)?;
        if let Some(path) = persist_to {
            persist_snapshot(path, &index).await?;
        }

        let count = index.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);

        tracing::info!(chunks = count, "Vector index replaced");
        crate::metrics::record_index_size(count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: Uuid::new_v4(),
            text: text.to_string(),
            source_file: "faq.pdf".to_string(),
            page_number: 1,
            chunk_index: 0,
            embedding,
        }
    }

    #[test]
    fn test_no_match_sentinel() {
        let hit = Neighbor { id: Uuid::nil(), score: 0.9 };
        assert!(hit.is_no_match());
        let hit = Neighbor { id: Uuid::new_v4(), score: 0.9 };
        assert!(!hit.is_no_match());
    }

    #[tokio::test]
    async fn test_replace_swaps_index() {
        let handle = IndexHandle::empty(2);
        assert!(handle.is_empty());

        let before = handle.snapshot();
        let count = handle
            .replace(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])], None)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(handle.len(), 2);
        // A reader holding the old snapshot keeps a consistent view
        assert_eq!(before.len(), 0);
    }

    #[tokio::test]
    async fn test_replace_rejects_wrong_dimension() {
        let handle = IndexHandle::empty(3);
        let result = handle.replace(vec![record("a", vec![1.0, 0.0])], None).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert!(handle.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_replace_conflicts() {
        let handle = IndexHandle::empty(2);
        let _held = handle.reindex.lock().await;

        let result = handle.replace(vec![record("a", vec![1.0, 0.0])], None).await;
        assert!(matches!(result, Err(AppError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_replace_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("snapshot.json");

        let handle = IndexHandle::empty(2);
        handle
            .replace(vec![record("a", vec![1.0, 0.0])], Some(&path))
            .await
            .unwrap();

        let reopened = IndexHandle::open(&path, 2).await.unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
