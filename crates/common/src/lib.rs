//! Clearpath Common Library
//!
//! Shared code for the Clearpath query service including:
//! - Configuration management
//! - Error types and handling
//! - Metrics and observability
//! - Embedding client abstraction
//! - Vector index boundary and in-memory flat index
//! - Generation client abstraction with retry policy

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod index;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use generation::Generator;
pub use index::{ChunkRecord, IndexHandle, VectorIndex};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
