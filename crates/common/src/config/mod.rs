//! Configuration management for Clearpath services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with CLEARPATH__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Retrieval and re-ranking parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Router tier table and lexicon source
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Generation service configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index persistence
    #[serde(default)]
    pub index: IndexConfig,

    /// Structured query log
    #[serde(default)]
    pub query_log: QueryLogConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins (empty allows any)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Nearest neighbours requested from the index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum inner-product score for a passage to be kept
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Character Jaccard similarity above which two passages are near-duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Score added to passages whose source name matches a query word
    #[serde(default = "default_rerank_boost")]
    pub rerank_boost: f32,
}

/// One generation tier: model identifier plus output token budget
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierConfig {
    pub model: String,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Tier used for `simple` queries
    #[serde(default = "default_simple_tier")]
    pub simple: TierConfig,

    /// Tier used for `complex` queries
    #[serde(default = "default_complex_tier")]
    pub complex: TierConfig,

    /// Optional file replacing the built-in phrase lists
    pub lexicon_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_generation_base")]
    pub api_base: String,

    /// API key (empty selects the mock generator)
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds. Streams apply it per chunk, not to the whole answer.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Growth factor between consecutive retry delays
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// JSON snapshot holding chunk records and embeddings
    #[serde(default = "default_index_path")]
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryLogConfig {
    /// Append-only JSONL file of per-request entries
    #[serde(default = "default_query_log_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level filter (debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Query requests per minute
    #[serde(default = "default_query_per_minute")]
    pub query_per_minute: u32,

    /// Index replacement requests per minute
    #[serde(default = "default_index_per_minute")]
    pub index_per_minute: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_allowed_origins() -> Vec<String> { vec!["http://localhost:5173".to_string()] }
fn default_top_k() -> usize { 5 }
fn default_similarity_threshold() -> f32 { 0.35 }
fn default_dedup_threshold() -> f32 { 0.80 }
fn default_rerank_boost() -> f32 { 0.05 }
fn default_simple_tier() -> TierConfig {
    TierConfig { model: "llama-3.1-8b-instant".to_string(), max_output_tokens: 512 }
}
fn default_complex_tier() -> TierConfig {
    TierConfig { model: "llama-3.3-70b-versatile".to_string(), max_output_tokens: 1024 }
}
fn default_generation_base() -> String { "https://api.groq.com/openai/v1".to_string() }
fn default_generation_timeout() -> u64 { 30 }
fn default_generation_retries() -> u32 { 2 }
fn default_initial_backoff_ms() -> u64 { 1000 }
fn default_backoff_multiplier() -> f64 { 3.0 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_index_path() -> String { "data/index/snapshot.json".to_string() }
fn default_query_log_path() -> String { "data/logs/queries.jsonl".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_query_per_minute() -> u32 { 30 }
fn default_index_per_minute() -> u32 { 5 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            dedup_threshold: default_dedup_threshold(),
            rerank_boost: default_rerank_boost(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            simple: default_simple_tier(),
            complex: default_complex_tier(),
            lexicon_path: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: default_generation_base(),
            api_key: String::new(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl GenerationConfig {
    /// Whole-request limit for blocking calls, idle limit between streamed chunks
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { snapshot_path: default_index_path() }
    }
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self { path: default_query_log_path() }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            query_per_minute: default_query_per_minute(),
            index_per_minute: default_index_per_minute(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with CLEARPATH__ prefix
            // e.g., CLEARPATH__RETRIEVAL__TOP_K=8
            .add_source(
                Environment::with_prefix("CLEARPATH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the query path cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Message("retrieval.top_k must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(ConfigError::Message(
                "retrieval.similarity_threshold must lie in [-1, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.dedup_threshold) {
            return Err(ConfigError::Message(
                "retrieval.dedup_threshold must lie in [0, 1]".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Message("embedding.dimension must be positive".into()));
        }
        if self.generation.backoff_multiplier < 1.0 {
            return Err(ConfigError::Message(
                "generation.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.similarity_threshold, 0.35);
        assert_eq!(config.routing.simple.model, "llama-3.1-8b-instant");
        assert_eq!(config.routing.complex.max_output_tokens, 1024);
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_defaults_match_one_then_three_seconds() {
        let config = AppConfig::default();
        assert_eq!(config.generation.initial_backoff_ms, 1000);
        assert_eq!(config.generation.timeout(), Duration::from_secs(30));
        assert_eq!(config.generation.backoff_multiplier, 3.0);
        assert_eq!(config.generation.max_retries, 2);
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = AppConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clearpath.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 8\n").unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.dedup_threshold, 0.80);
        assert_eq!(config.routing.simple.max_output_tokens, 512);
    }
}
