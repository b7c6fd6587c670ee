//! Text generation boundary
//!
//! The query path hands role-tagged messages, a model identifier and an
//! output token budget to a [`Generator`] and receives either the complete
//! answer or a stream of tokens. Retry and timeout policy live here; callers
//! only ever see success or a terminal failure.

mod mock;
mod openai;

pub use mock::MockGenerator;
pub use openai::OpenAiCompatibleGenerator;

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Everything a generation call needs
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A complete generated answer
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Failure at the generation boundary
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// 4xx: the request itself is wrong, retrying cannot help
    #[error("Generation request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Generation service returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Generation request timed out")]
    Timeout,

    #[error("Generation service unreachable: {0}")]
    Transport(String),

    #[error("Malformed generation response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// 5xx, timeouts and connection failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Upstream { .. } | GenerationError::Timeout | GenerationError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else if err.is_decode() {
            GenerationError::Malformed(err.to_string())
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        AppError::GenerationFailure {
            message: err.to_string(),
        }
    }
}

/// Stream of answer fragments in arrival order
pub type TokenStream = BoxStream<'static, std::result::Result<String, GenerationError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a complete answer
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationError>;

    /// Start a streamed answer. Retries cover establishing the stream only;
    /// a failure after the first token ends the stream with an error item.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<TokenStream, GenerationError>;

    /// Whether the service answers at all
    async fn probe(&self) -> bool;
}

/// Retry schedule for retryable generation failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Run `operation` until it succeeds, fails terminally, or exhausts retries.
///
/// Delays follow `initial_backoff * multiplier^n` without jitter, so the
/// default policy waits 1 s and then 3 s.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> std::result::Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, GenerationError>>,
{
    let attempts = AtomicU32::new(0);
    let max_retries = policy.max_retries;

    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_backoff)
        .with_multiplier(policy.multiplier)
        .with_randomization_factor(0.0)
        .with_max_interval(Duration::from_secs(60))
        .with_max_elapsed_time(None)
        .build();

    let result = backoff::future::retry_notify(
        schedule,
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let call = operation();
            async move {
                call.await.map_err(|err| {
                    if err.is_retryable() && attempt <= max_retries {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        },
        |err: GenerationError, delay: Duration| {
            crate::metrics::record_generation_retry();
            tracing::warn!(
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Generation attempt failed, retrying"
            );
        },
    )
    .await;

    if let Err(err) = &result {
        tracing::error!(
            error = %err,
            attempts = attempts.load(Ordering::Relaxed),
            retryable = err.is_retryable(),
            "Generation failed"
        );
    }
    result
}

/// Rough token estimate: one token per 0.75 words
pub fn estimate_tokens(text: &str) -> u32 {
    (text.split_whitespace().count() as f64 / 0.75) as u32
}

/// Create a generator based on configuration.
///
/// An empty API key selects the mock generator so the service can run
/// locally without credentials.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    if config.api_key.trim().is_empty() {
        tracing::warn!("No generation API key configured, using mock generator");
        return Ok(Arc::new(MockGenerator::new(mock::FALLBACK_ANSWER)));
    }
    Ok(Arc::new(OpenAiCompatibleGenerator::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            multiplier: 3.0,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GenerationError::Upstream { status: 503, message: String::new() }.is_retryable());
        assert!(GenerationError::Timeout.is_retryable());
        assert!(GenerationError::Transport("refused".into()).is_retryable());
        assert!(!GenerationError::Rejected { status: 400, message: String::new() }.is_retryable());
        assert!(!GenerationError::Malformed("eof".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_two_retries() {
        let calls = AtomicUsize::new(0);
        let result: std::result::Result<(), _> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerationError::Upstream { status: 502, message: "bad gateway".into() }) }
        })
        .await;

        assert!(matches!(result, Err(GenerationError::Upstream { status: 502, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_never_repeats_client_errors() {
        let calls = AtomicUsize::new(0);
        let result: std::result::Result<(), _> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerationError::Rejected { status: 400, message: "bad model".into() }) }
        })
        .await;

        assert!(matches!(result, Err(GenerationError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_timeout() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GenerationError::Timeout)
                } else {
                    Ok("answer")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_policy_matches_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 3.0);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 4);
    }

    #[test]
    fn test_generation_error_maps_to_service_unavailable() {
        let err: AppError = GenerationError::Timeout.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_empty_key_selects_mock() {
        assert!(create_generator(&GenerationConfig::default()).is_ok());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("be brief")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
