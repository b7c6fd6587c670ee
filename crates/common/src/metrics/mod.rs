//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the query path with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Clearpath metrics
pub const METRICS_PREFIX: &str = "clearpath";

/// Histogram buckets for retrieval latency (in seconds)
pub const RETRIEVAL_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
];

/// Buckets for generation latency (typically much slower)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Routing metrics
    describe_counter!(
        format!("{}_queries_classified_total", METRICS_PREFIX),
        Unit::Count,
        "Queries classified by the deterministic router"
    );

    // Retrieval metrics
    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embed, retrieve and re-rank latency in seconds"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Passages surviving threshold and deduplication"
    );

    describe_counter!(
        format!("{}_retrieval_empty_total", METRICS_PREFIX),
        Unit::Count,
        "Queries for which no passage cleared the similarity threshold"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total generation requests"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Generation latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Generation attempts retried after a retryable failure"
    );

    // Evaluator metrics
    describe_counter!(
        format!("{}_evaluator_flags_total", METRICS_PREFIX),
        Unit::Count,
        "Advisory flags raised by the output evaluator"
    );

    // Index metrics
    describe_gauge!(
        format!("{}_index_chunks", METRICS_PREFIX),
        Unit::Count,
        "Chunks in the active vector index"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a routing decision
pub fn record_classification(classification: &str, rule: &str) {
    counter!(
        format!("{}_queries_classified_total", METRICS_PREFIX),
        "classification" => classification.to_string(),
        "rule" => rule.to_string()
    )
    .increment(1);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, result_count: usize) {
    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    gauge!(format!("{}_retrieval_results_count", METRICS_PREFIX)).set(result_count as f64);

    if result_count == 0 {
        counter!(format!("{}_retrieval_empty_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record generation metrics
pub fn record_generation(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a retried generation attempt
pub fn record_generation_retry() {
    counter!(format!("{}_generation_retries_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record an evaluator flag
pub fn record_flag(flag: &str) {
    counter!(
        format!("{}_evaluator_flags_total", METRICS_PREFIX),
        "flag" => flag.to_string()
    )
    .increment(1);
}

/// Helper to record the active index size
pub fn record_index_size(chunks: usize) {
    gauge!(format!("{}_index_chunks", METRICS_PREFIX)).set(chunks as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_sorted(buckets: &[f64]) {
        let mut prev = 0.0;
        for &bucket in buckets {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_buckets_are_sorted() {
        assert_sorted(RETRIEVAL_BUCKETS);
        assert_sorted(GENERATION_BUCKETS);
        // Generation timeout (30s) should be a bucket boundary
        assert!(GENERATION_BUCKETS.contains(&30.0));
    }

    #[test]
    fn test_recorders_without_exporter() {
        let metrics = RequestMetrics::start("POST", "/api/query");
        record_classification("simple", "short_query");
        record_retrieval(0.004, 0);
        record_generation(1.2, "llama-3.1-8b-instant", true);
        record_flag("no_context_warning");
        metrics.finish(200);
        // Just verify it runs without panic
    }
}
