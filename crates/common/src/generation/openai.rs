//! OpenAI-compatible chat completions client (Groq, OpenAI, local servers)

use super::{
    estimate_tokens, with_retry, ChatMessage, Generation, GenerationError, GenerationRequest,
    Generator, RetryPolicy, TokenStream, TokenUsage,
};
use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Total limit for non-streaming completions
    timeout: Duration,
    policy: RetryPolicy,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let timeout = config.timeout();

        // No client-wide total timeout: it would also cut off long streamed answers
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout,
            policy: RetryPolicy::from_config(config),
        })
    }

    /// Replace the retry schedule (tests use millisecond delays)
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, GenerationError> {
        let body = CompletionBody {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_output_tokens,
            stream,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(GenerationError::Upstream { status: status.as_u16(), message })
        } else {
            Err(GenerationError::Rejected { status: status.as_u16(), message })
        }
    }
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, GenerationError> {
        let response = with_retry(&self.policy, || self.send(request, false)).await?;
        let completion: CompletionResponse = response.json().await?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("response has no message content".into()))?;

        let usage = match completion.usage {
            Some(u) => TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            },
            None => TokenUsage {
                input_tokens: request.messages.iter().map(|m| estimate_tokens(&m.content)).sum(),
                output_tokens: estimate_tokens(&text),
            },
        };

        Ok(Generation { text, usage })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<TokenStream, GenerationError> {
        let response = with_retry(&self.policy, || self.send(request, true)).await?;
        let bytes = response.bytes_stream().boxed();

        let tokens = futures::stream::unfold(
            (bytes, SseDecoder::default(), VecDeque::new(), false),
            |(mut bytes, mut decoder, mut pending, mut finished)| async move {
                loop {
                    if let Some(item) = pending.pop_front() {
                        return Some((item, (bytes, decoder, pending, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for event in decoder.push(&chunk) {
                                match event {
                                    SseEvent::Token(token) => pending.push_back(Ok(token)),
                                    SseEvent::Invalid(reason) => {
                                        pending.push_back(Err(GenerationError::Malformed(reason)));
                                        finished = true;
                                        break;
                                    }
                                    SseEvent::Done => {
                                        finished = true;
                                        break;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            pending.push_back(Err(GenerationError::from(e)));
                            finished = true;
                        }
                        None => finished = true,
                    }
                }
            },
        );

        Ok(tokens.boxed())
    }

    async fn probe(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(r) => !r.status().is_server_error(),
            Err(e) => {
                tracing::debug!(error = %e, "Generation service probe failed");
                false
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    Done,
    Invalid(String),
}

/// Incremental `data:` line decoder for streamed chat completions.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(payload) = line.trim().strip_prefix("data:") else {
                continue;
            };

            let payload = payload.trim();
            if payload == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            match serde_json::from_str::<StreamChunk>(payload) {
                Ok(chunk) => {
                    let token = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .unwrap_or_default();
                    if !token.is_empty() {
                        events.push(SseEvent::Token(token));
                    }
                }
                Err(e) => events.push(SseEvent::Invalid(e.to_string())),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn delta(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn test_decoder_emits_tokens_and_done() {
        let mut decoder = SseDecoder::default();
        let body = format!("{}{}data: [DONE]\n\n", delta("Hello"), delta(" there"));

        let events = decoder.push(body.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Token("Hello".into()),
                SseEvent::Token(" there".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        let body = delta("café");
        let bytes = body.as_bytes();
        // Split inside the two-byte 'é'
        let split = body.find('é').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![SseEvent::Token("café".into())]);
    }

    #[test]
    fn test_decoder_skips_comments_and_empty_deltas() {
        let mut decoder = SseDecoder::default();
        let body = format!(": keep-alive\n\n{}", delta(""));
        assert!(decoder.push(body.as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_reports_garbage() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {not json}\n");
        assert!(matches!(events.as_slice(), [SseEvent::Invalid(_)]));
    }

    /// Local completions endpoint. Streams three tokens `gap` apart, or
    /// answers non-streaming calls after `gap`.
    async fn completions_server(gap: Duration) -> String {
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            axum::routing::post(move |axum::Json(body): axum::Json<serde_json::Value>| async move {
                if body["stream"] != true {
                    tokio::time::sleep(gap).await;
                    return axum::Json(serde_json::json!({
                        "choices": [{"message": {"content": "late"}}]
                    }))
                    .into_response();
                }
                let chunks = futures::stream::unfold(0u32, move |n| async move {
                    if n > 3 {
                        return None;
                    }
                    if n > 0 {
                        tokio::time::sleep(gap).await;
                    }
                    let chunk = if n < 3 { delta(&format!("t{n} ")) } else { "data: [DONE]\n\n".to_string() };
                    Some((Ok::<_, std::convert::Infallible>(chunk), n + 1))
                });
                axum::body::Body::from_stream(chunks).into_response()
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/v1")
    }

    fn local_generator(api_base: String) -> OpenAiCompatibleGenerator {
        let config = GenerationConfig {
            api_base,
            api_key: "key".into(),
            timeout_secs: 1,
            ..GenerationConfig::default()
        };
        OpenAiCompatibleGenerator::new(&config).unwrap().with_policy(RetryPolicy {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        })
    }

    fn hello_request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "llama-3.1-8b-instant".into(),
            max_output_tokens: 16,
        }
    }

    #[tokio::test]
    async fn test_stream_outlives_request_timeout() {
        // 1.2s of streaming against a 1s timeout, never idle for 1s
        let generator = local_generator(completions_server(Duration::from_millis(400)).await);

        let tokens: Vec<_> = generator
            .generate_stream(&hello_request())
            .await
            .unwrap()
            .collect()
            .await;
        let tokens: Vec<String> = tokens.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(tokens.concat(), "t0 t1 t2 ");
    }

    #[tokio::test]
    async fn test_blocking_completion_times_out() {
        let generator = local_generator(completions_server(Duration::from_millis(1500)).await);
        let err = generator.generate(&hello_request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let config = GenerationConfig {
            api_base: "http://localhost:11434/v1/".into(),
            api_key: "key".into(),
            ..GenerationConfig::default()
        };
        let generator = OpenAiCompatibleGenerator::new(&config).unwrap();
        assert_eq!(generator.base_url, "http://localhost:11434/v1");
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_after_retries() {
        let config = GenerationConfig {
            // Nothing listens on port 9 locally
            api_base: "http://127.0.0.1:9/v1".into(),
            api_key: "key".into(),
            timeout_secs: 2,
            ..GenerationConfig::default()
        };
        let generator = OpenAiCompatibleGenerator::new(&config).unwrap().with_policy(RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        });

        let request = GenerationRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "llama-3.1-8b-instant".into(),
            max_output_tokens: 16,
        };
        let err = generator.generate(&request).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!generator.probe().await);
    }
}
