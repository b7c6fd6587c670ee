//! JSON snapshot persistence for the flat index

use super::{ChunkRecord, FlatIndex};
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk form of an index
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub dimension: usize,
    pub records: Vec<ChunkRecord>,
}

/// Load a snapshot from disk.
///
/// A missing file yields an empty index. A snapshot built for a different
/// embedding dimension is refused, since every query would fail against it.
pub async fn load_snapshot(path: &Path, dimension: usize) -> Result<FlatIndex> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                path = %path.display(),
                dimension,
                "No index snapshot found, starting with empty index"
            );
            return Ok(FlatIndex::empty(dimension));
        }
        Err(e) => return Err(e.into()),
    };

    let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.dimension != dimension {
        return Err(AppError::IndexUnavailable {
            message: format!(
                "Index snapshot dimension mismatch: expected {}, got {}. Re-ingest all documents.",
                dimension, snapshot.dimension
            ),
        });
    }

    let index = FlatIndex::build(dimension, snapshot.records)?;
    tracing::info!(
        path = %path.display(),
        chunks = index.records().len(),
        dimension,
        "Index snapshot loaded"
    );
    Ok(index)
}

/// Write a snapshot next to its destination, then rename over it
pub async fn persist_snapshot(path: &Path, index: &FlatIndex) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let records: Vec<&ChunkRecord> = index.records().iter().map(|r| r.as_ref()).collect();
    let body = serde_json::to_vec(&serde_json::json!({
        "dimension": super::VectorIndex::dimension(index),
        "records": records,
    }))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;

    tracing::info!(path = %path.display(), chunks = records.len(), "Index snapshot persisted");
    Ok(())
}
