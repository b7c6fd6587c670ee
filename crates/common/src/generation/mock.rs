use super::{
    estimate_tokens, Generation, GenerationError, GenerationRequest, Generator, TokenStream,
    TokenUsage,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Mutex, PoisonError};

pub(crate) const FALLBACK_ANSWER: &str =
    "I don't have enough information in our documentation to answer that question.";

/// Scripted generator for tests and credential-less local runs
pub struct MockGenerator {
    answer: String,
    failure: Option<GenerationError>,
    reachable: bool,
    /// Only `recording` generators keep requests
    requests: Option<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerator {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            failure: None,
            reachable: true,
            requests: None,
        }
    }

    /// Like `new`, but keeps every request for inspection
    pub fn recording(answer: impl Into<String>) -> Self {
        Self {
            requests: Some(Mutex::new(Vec::new())),
            ..Self::new(answer)
        }
    }

    /// Every call fails with `error`
    pub fn failing(error: GenerationError) -> Self {
        Self {
            failure: Some(error),
            reachable: false,
            ..Self::new("")
        }
    }

    /// Requests received so far (always empty unless recording)
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .as_ref()
            .map(|requests| requests.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }

    fn record(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        if let Some(requests) = &self.requests {
            requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.record(request)?;
        Ok(Generation {
            text: self.answer.clone(),
            usage: TokenUsage {
                input_tokens: request.messages.iter().map(|m| estimate_tokens(&m.content)).sum(),
                output_tokens: estimate_tokens(&self.answer),
            },
        })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream, GenerationError> {
        self.record(request)?;
        let tokens: Vec<Result<String, GenerationError>> = self
            .answer
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(futures::stream::iter(tokens).boxed())
    }

    async fn probe(&self) -> bool {
        self.reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ChatMessage;

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("What is Clearpath?")],
            model: "llama-3.1-8b-instant".into(),
            max_output_tokens: 512,
        }
    }

    #[tokio::test]
    async fn test_recording_mock_keeps_requests() {
        let generator = MockGenerator::recording("Clearpath is a project tool.");
        let generation = generator.generate(&request()).await.unwrap();

        assert_eq!(generation.text, "Clearpath is a project tool.");
        assert_eq!(generator.requests().len(), 1);
        assert_eq!(generator.requests()[0].max_output_tokens, 512);
    }

    #[tokio::test]
    async fn test_plain_mock_retains_nothing() {
        let generator = MockGenerator::new(FALLBACK_ANSWER);
        for _ in 0..100 {
            generator.generate(&request()).await.unwrap();
            let _ = generator.generate_stream(&request()).await.unwrap();
        }
        assert!(generator.requests().is_empty());
        assert!(generator.requests.is_none());
    }

    #[tokio::test]
    async fn test_mock_stream_reassembles_answer() {
        let generator = MockGenerator::new("one two three");
        let tokens: Vec<String> = generator
            .generate_stream(&request())
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens.concat(), "one two three");
        assert_eq!(tokens.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let generator = MockGenerator::failing(GenerationError::Timeout);
        assert!(generator.generate(&request()).await.is_err());
        assert!(!generator.probe().await);
    }
}
