//! API handlers module

pub mod health;
pub mod index;
pub mod logs;
pub mod query;

use axum::http::HeaderMap;
use uuid::Uuid;

/// Id assigned by the request-id layer, or a fresh one outside it
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
