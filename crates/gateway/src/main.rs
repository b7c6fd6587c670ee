//! Clearpath API Gateway
//!
//! The HTTP surface of the support assistant.
//! Handles:
//! - Query answering (JSON and SSE streaming)
//! - Index replacement from precomputed chunk records
//! - Health and query-log inspection
//! - Rate limiting and observability (logging, metrics, request ids)

mod handlers;
mod middleware;
mod prompt;
mod query_log;
mod sanitize;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use clearpath_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::{create_embedder, Embedder},
    errors::AppError,
    generation::{create_generator, Generator},
    index::IndexHandle,
    metrics::{self, GENERATION_BUCKETS, METRICS_PREFIX, RETRIEVAL_BUCKETS},
};
use clearpath_search::{Lexicon, QueryPipeline};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};
use query_log::QueryLog;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<QueryPipeline>,
    pub generator: Arc<dyn Generator>,
    pub index: Arc<IndexHandle>,
    pub query_log: Arc<QueryLog>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        lexicon: &Lexicon,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        index: Arc<IndexHandle>,
    ) -> Result<Self, AppError> {
        let pipeline = QueryPipeline::new(&config, lexicon, embedder, Arc::clone(&index))?;
        let query_log = QueryLog::new(&config.query_log.path);

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            generator,
            index,
            query_log: Arc::new(query_log),
            started_at: Instant::now(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting Clearpath API Gateway v{}", clearpath_common::VERSION);

    init_metrics(config.observability.metrics_port)?;

    let lexicon = Lexicon::load(config.routing.lexicon_path.as_deref())?;
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;

    info!(path = %config.index.snapshot_path, "Loading vector index...");
    let index = IndexHandle::open(Path::new(&config.index.snapshot_path), config.embedding.dimension).await?;
    metrics::record_index_size(index.len());
    info!(chunks = index.len(), "Vector index ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState::new(config, &lexicon, embedder, generator, Arc::new(index))?;
    info!(path = %state.query_log.path().display(), "Query log ready");

    // Build the router
    let app = create_router(state);

    // Start the server
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Install the Prometheus exporter on `port` (0 disables it)
fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)),
            RETRIEVAL_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_generation_duration_seconds", METRICS_PREFIX)),
            GENERATION_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::register_metrics();
    info!(port, "Metrics exporter listening");
    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut query_routes = Router::new().route("/query", post(handlers::query::query));
    let mut index_routes = Router::new().route("/index", post(handlers::index::replace));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        query_routes = query_routes.route_layer(axum::middleware::from_fn_with_state(
            create_rate_limiter(limits.query_per_minute),
            rate_limit_middleware,
        ));
        index_routes = index_routes.route_layer(axum::middleware::from_fn_with_state(
            create_rate_limiter(limits.index_per_minute),
            rate_limit_middleware,
        ));
    }

    // API routes
    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/debug", get(handlers::logs::recent))
        .route("/logs", get(handlers::logs::list))
        .merge(query_routes)
        .merge(index_routes);

    // Compose the app; the request id is set outermost so every inner layer sees it
    Router::new()
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
