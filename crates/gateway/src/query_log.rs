//! Append-only JSONL query log
//!
//! One line per answered (or failed) query. Readers tolerate partial or
//! malformed lines so a crash mid-write never hides the rest of the log.

use chrono::{DateTime, Utc};
use clearpath_common::errors::Result;
use clearpath_search::{Classification, EvaluatorFlag};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub classification: Classification,
    pub model_used: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u64,
    pub retrieval_count: usize,
    pub retrieval_scores: Vec<f32>,
    pub evaluator_flags: Vec<EvaluatorFlag>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct QueryLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QueryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single JSON line
    pub async fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append, logging instead of failing. A lost log line never fails a request.
    pub async fn record(&self, entry: &QueryLogEntry) {
        if let Err(e) = self.append(entry).await {
            tracing::error!(
                error = %e,
                request_id = %entry.request_id,
                path = %self.path.display(),
                "Failed to write query log entry"
            );
        }
    }

    /// All readable entries, oldest first.
    ///
    /// Reads and parses the whole file on every call, so `/api/debug` and
    /// `/api/logs` cost O(log size). Fine for a log of a few thousand lines
    /// (roughly 500 bytes each); rotate the file before it grows much past that.
    pub async fn read_all(&self) -> Result<Vec<QueryLogEntry>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!(line = number + 1, error = %e, "Skipping malformed query log line"),
            }
        }
        Ok(entries)
    }

    /// Up to `n` entries, most recent first, with the total entry count
    pub async fn recent(&self, n: usize) -> Result<(Vec<QueryLogEntry>, usize)> {
        let entries = self.read_all().await?;
        let total = entries.len();
        Ok((entries.into_iter().rev().take(n).collect(), total))
    }

    /// A window over the log in file order, with the total entry count
    pub async fn page(&self, offset: usize, limit: usize) -> Result<(Vec<QueryLogEntry>, usize)> {
        let entries = self.read_all().await?;
        let total = entries.len();
        Ok((entries.into_iter().skip(offset).take(limit).collect(), total))
    }
}
