//! Index replacement handler
//!
//! Accepts chunk records produced by the external ingestion job and swaps
//! them in as the active index, persisting the snapshot first.

use crate::AppState;
use axum::{extract::State, Json};
use clearpath_common::{
    errors::{AppError, Result},
    index::ChunkRecord,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct IndexRequest {
    #[validate(length(min = 1, message = "At least one chunk is required"), nested)]
    pub chunks: Vec<ChunkInput>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ChunkInput {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,

    #[validate(length(min = 1))]
    pub text: String,

    #[validate(length(min = 1))]
    pub source_file: String,

    #[validate(range(min = 1))]
    pub page_number: u32,

    #[serde(default)]
    pub chunk_index: u32,

    pub embedding: Vec<f32>,
}

impl From<ChunkInput> for ChunkRecord {
    fn from(input: ChunkInput) -> Self {
        ChunkRecord {
            id: input.id.unwrap_or_else(Uuid::new_v4),
            text: input.text,
            source_file: input.source_file,
            page_number: input.page_number,
            chunk_index: input.chunk_index,
            embedding: input.embedding,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub status: String,
    pub chunks_indexed: usize,
    pub processing_time_ms: u64,
}

/// Replace the active index. A concurrent replacement gets 409.
pub async fn replace(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexResponse>> {
    let started = Instant::now();
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("chunks".to_string()),
    })?;

    let records: Vec<ChunkRecord> = request.chunks.into_iter().map(Into::into).collect();
    let snapshot_path = Path::new(&state.config.index.snapshot_path);
    let chunks_indexed = state.index.replace(records, Some(snapshot_path)).await?;

    Ok(Json(IndexResponse {
        status: "success".to_string(),
        chunks_indexed,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }))
}
