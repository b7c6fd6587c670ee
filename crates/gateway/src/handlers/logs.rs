//! Query log inspection handlers

use crate::{query_log::QueryLogEntry, AppState};
use axum::{
    extract::{Query, State},
    Json,
};
use clearpath_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct DebugParams {
    #[serde(default = "default_recent")]
    #[validate(range(min = 1, max = 100))]
    pub n: usize,
}

fn default_recent() -> usize {
    10
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugResponse {
    pub entries: Vec<QueryLogEntry>,
    pub total_count: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LogsParams {
    #[serde(default)]
    pub offset: usize,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 500))]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<QueryLogEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

fn invalid(e: validator::ValidationErrors) -> AppError {
    AppError::Validation {
        message: e.to_string(),
        field: None,
    }
}

/// Most recent query log entries, newest first
pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<DebugParams>,
) -> Result<Json<DebugResponse>> {
    params.validate().map_err(invalid)?;

    let (entries, total_count) = state.query_log.recent(params.n).await?;
    Ok(Json(DebugResponse {
        entries,
        total_count,
    }))
}

/// Paginated query log in write order
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<LogsResponse>> {
    params.validate().map_err(invalid)?;

    let (logs, total) = state.query_log.page(params.offset, params.limit).await?;
    Ok(Json(LogsResponse {
        logs,
        total,
        offset: params.offset,
        limit: params.limit,
    }))
}
