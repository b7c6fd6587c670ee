//! Health check handler

use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` when the index has chunks and generation answers, else `degraded`
    pub status: String,
    pub index_loaded: bool,
    pub total_chunks: usize,
    pub generation_reachable: bool,
    pub uptime_seconds: f64,
}

/// Report dependency state. Always 200 so load balancers can read the body.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let total_chunks = state.index.len();
    let index_loaded = total_chunks > 0;
    let generation_reachable = state.generator.probe().await;

    let status = if index_loaded && generation_reachable {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        index_loaded,
        total_chunks,
        generation_reachable,
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
    })
}
