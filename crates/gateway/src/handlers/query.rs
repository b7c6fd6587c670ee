//! Query handler: plan, generate, evaluate and log one support question

use super::request_id;
use crate::{prompt, query_log::QueryLogEntry, sanitize::sanitize_input, AppState};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use clearpath_common::{
    errors::{AppError, Result},
    generation::{estimate_tokens, GenerationError, GenerationRequest, Generator, TokenUsage},
    metrics,
};
use clearpath_search::{Classification, EvaluatorFlag, FlagSet, QueryPlan};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Instant;
use tokio::sync::mpsc;
use validator::Validate;

/// Buffered SSE events per streaming request
const STREAM_BUFFER: usize = 32;

#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    /// Raw user question. The 2000-character limit applies after sanitizing.
    #[validate(length(min = 1, max = 8000, message = "Query must be between 1 and 8000 characters"))]
    pub query: String,

    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_file: String,
    pub page_number: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugInfo {
    pub classification: Classification,
    pub model_used: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u64,
    pub retrieval_count: usize,
    pub evaluator_flags: Vec<EvaluatorFlag>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub debug: DebugInfo,
}

/// Final SSE event of a successful stream
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamDone {
    pub request_id: String,
    pub sources: Vec<SourceRef>,
    pub debug: DebugInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamError {
    pub error: String,
    pub request_id: String,
    pub status_code: u16,
}

/// Answer a support question, as JSON or as an SSE token stream
pub async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Response> {
    let started = Instant::now();
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    let request_id = request_id(&headers);
    let query = sanitize_input(&request.query);
    let plan = state.pipeline.plan(&query).await?;

    let generation_request = GenerationRequest {
        messages: prompt::assemble(&plan.query, &plan.passages),
        model: plan.tier.model.clone(),
        max_output_tokens: plan.tier.max_output_tokens,
    };

    if request.stream {
        return Ok(stream_answer(state, request_id, plan, generation_request, started).into_response());
    }

    let generation_started = Instant::now();
    let result = state.generator.generate(&generation_request).await;
    metrics::record_generation(
        generation_started.elapsed().as_secs_f64(),
        &plan.tier.model,
        result.is_ok(),
    );

    let generation = match result {
        Ok(generation) => generation,
        Err(e) => {
            let debug = debug_info(&plan, TokenUsage::default(), elapsed_ms(started), &FlagSet::new());
            state
                .query_log
                .record(&log_entry(&request_id, &plan, &debug, Some(e.to_string())))
                .await;
            return Err(e.into());
        }
    };

    let flags = state.pipeline.evaluate(&plan, &generation.text);
    let debug = debug_info(&plan, generation.usage, elapsed_ms(started), &flags);
    state
        .query_log
        .record(&log_entry(&request_id, &plan, &debug, None))
        .await;

    // `debug` would be shadowed by `tracing::field::debug` inside the macro
    let answered = &debug;
    tracing::info!(
        request_id = %request_id,
        classification = %answered.classification,
        model = %answered.model_used,
        latency_ms = answered.latency_ms,
        "Query answered"
    );

    Ok(Json(QueryResponse {
        request_id,
        answer: generation.text,
        sources: sources(&plan),
        debug,
    })
    .into_response())
}

/// Why a stream ended before completing
#[derive(Debug)]
enum StreamFailure {
    Disconnected,
    Generation(GenerationError),
}

impl From<GenerationError> for StreamFailure {
    fn from(err: GenerationError) -> Self {
        StreamFailure::Generation(err)
    }
}

fn stream_answer(
    state: AppState,
    request_id: String,
    plan: QueryPlan,
    request: GenerationRequest,
    started: Instant,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(run_stream(state, request_id, plan, request, started, tx));

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn run_stream(
    state: AppState,
    request_id: String,
    plan: QueryPlan,
    request: GenerationRequest,
    started: Instant,
    tx: mpsc::Sender<Event>,
) {
    let generation_started = Instant::now();

    // Dropping the token stream aborts the upstream request
    let outcome = tokio::select! {
        _ = tx.closed() => Err(StreamFailure::Disconnected),
        result = forward_tokens(state.generator.as_ref(), &request, &tx) => result,
    };

    match outcome {
        Ok(answer) => {
            metrics::record_generation(generation_started.elapsed().as_secs_f64(), &request.model, true);

            let usage = TokenUsage {
                input_tokens: prompt_tokens(&request),
                output_tokens: estimate_tokens(&answer),
            };
            let flags = state.pipeline.evaluate(&plan, &answer);
            let debug = debug_info(&plan, usage, elapsed_ms(started), &flags);
            state
                .query_log
                .record(&log_entry(&request_id, &plan, &debug, None))
                .await;

            let done = StreamDone {
                request_id: request_id.clone(),
                sources: sources(&plan),
                debug,
            };
            if tx.send(sse_event("done", &done)).await.is_err() {
                tracing::debug!(request_id = %request_id, "Client left before the done event");
            }
        }
        Err(StreamFailure::Disconnected) => {
            tracing::info!(request_id = %request_id, "Client disconnected, generation cancelled");
            let debug = debug_info(&plan, TokenUsage::default(), elapsed_ms(started), &FlagSet::new());
            state
                .query_log
                .record(&log_entry(&request_id, &plan, &debug, Some("client disconnected".to_string())))
                .await;
        }
        Err(StreamFailure::Generation(e)) => {
            metrics::record_generation(generation_started.elapsed().as_secs_f64(), &request.model, false);

            let debug = debug_info(&plan, TokenUsage::default(), elapsed_ms(started), &FlagSet::new());
            state
                .query_log
                .record(&log_entry(&request_id, &plan, &debug, Some(e.to_string())))
                .await;

            let app_error = AppError::from(e);
            tracing::error!(request_id = %request_id, error = %app_error, "Streaming generation failed");
            let payload = StreamError {
                error: app_error.public_message(),
                request_id,
                status_code: app_error.status_code().as_u16(),
            };
            let _ = tx.send(sse_event("error", &payload)).await;
        }
    }
}

async fn forward_tokens(
    generator: &dyn Generator,
    request: &GenerationRequest,
    tx: &mpsc::Sender<Event>,
) -> std::result::Result<String, StreamFailure> {
    let mut tokens = generator.generate_stream(request).await?;
    let mut answer = String::new();

    while let Some(token) = tokens.next().await {
        let token = token?;
        answer.push_str(&token);
        let event = sse_event("token", &serde_json::json!({ "token": token }));
        tx.send(event).await.map_err(|_| StreamFailure::Disconnected)?;
    }
    Ok(answer)
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default().event(name).json_data(payload).unwrap_or_else(|e| {
        tracing::error!(error = %e, event = name, "Failed to encode SSE payload");
        Event::default()
            .event("error")
            .data(r#"{"error":"An internal server error occurred."}"#)
    })
}

fn prompt_tokens(request: &GenerationRequest) -> u32 {
    request.messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn sources(plan: &QueryPlan) -> Vec<SourceRef> {
    plan.passages
        .iter()
        .map(|p| SourceRef {
            source_file: p.source_file().to_string(),
            page_number: p.chunk.page_number,
            score: p.score,
        })
        .collect()
}

fn debug_info(plan: &QueryPlan, usage: TokenUsage, latency_ms: u64, flags: &FlagSet) -> DebugInfo {
    DebugInfo {
        classification: plan.classification(),
        model_used: plan.tier.model.clone(),
        tokens_input: usage.input_tokens,
        tokens_output: usage.output_tokens,
        latency_ms,
        retrieval_count: plan.retrieval_count,
        evaluator_flags: flags.iter().copied().collect(),
    }
}

fn log_entry(request_id: &str, plan: &QueryPlan, debug: &DebugInfo, error: Option<String>) -> QueryLogEntry {
    QueryLogEntry {
        request_id: request_id.to_string(),
        timestamp: Utc::now(),
        query: plan.query.clone(),
        classification: debug.classification,
        model_used: debug.model_used.clone(),
        tokens_input: debug.tokens_input,
        tokens_output: debug.tokens_output,
        latency_ms: debug.latency_ms,
        retrieval_count: debug.retrieval_count,
        retrieval_scores: plan.scores(),
        evaluator_flags: debug.evaluator_flags.clone(),
        error,
    }
}
