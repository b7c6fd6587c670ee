//! Query pipeline orchestrator
//!
//! Given a raw query, produces everything the caller needs to build a
//! prompt and log the decision: classification, tier, ordered passages and
//! the retrieval count. Routing and retrieval have no data dependency and
//! run concurrently. Evaluation runs after generation, on the same plan.

use crate::evaluation::{FlagSet, OutputEvaluator};
use crate::features::{FeatureExtractor, FeatureSet};
use crate::lexicon::Lexicon;
use crate::retrieval::{Reranker, RetrievedPassage, VectorRetriever};
use crate::router::{Classification, Decision, GenerationTier, Router, TierTable};
use clearpath_common::config::AppConfig;
use clearpath_common::embeddings::Embedder;
use clearpath_common::errors::{AppError, Result};
use clearpath_common::index::IndexHandle;
use std::sync::Arc;
use std::time::Instant;

/// Longest accepted query, in characters, after trimming
pub const MAX_QUERY_CHARS: usize = 2000;

/// Everything decided about one query before generation
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Trimmed query text
    pub query: String,
    pub features: FeatureSet,
    pub decision: Decision,
    pub tier: GenerationTier,
    pub passages: Vec<RetrievedPassage>,
    /// Passages that cleared the threshold and deduplication
    pub retrieval_count: usize,
    pub retrieval_ms: u64,
}

impl QueryPlan {
    pub fn classification(&self) -> Classification {
        self.decision.classification
    }

    /// Final passage scores in ranked order
    pub fn scores(&self) -> Vec<f32> {
        self.passages.iter().map(|p| p.score).collect()
    }
}

pub struct QueryPipeline {
    extractor: FeatureExtractor,
    router: Router,
    embedder: Arc<dyn Embedder>,
    retriever: VectorRetriever,
    reranker: Reranker,
    evaluator: OutputEvaluator,
    top_k: usize,
    similarity_threshold: f32,
}

impl QueryPipeline {
    pub fn new(
        config: &AppConfig,
        lexicon: &Lexicon,
        embedder: Arc<dyn Embedder>,
        index: Arc<IndexHandle>,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(AppError::Configuration {
                message: format!(
                    "Embedder produces {}-dimensional vectors but the index expects {}",
                    embedder.dimension(),
                    index.dimension()
                ),
            });
        }

        let retrieval = &config.retrieval;
        Ok(Self {
            extractor: FeatureExtractor::new(&lexicon.routing)?,
            router: Router::new(TierTable::from_config(&config.routing)),
            embedder,
            retriever: VectorRetriever::new(index, retrieval.dedup_threshold),
            reranker: Reranker::new(retrieval.rerank_boost, &lexicon.stop_words),
            evaluator: OutputEvaluator::new(&lexicon.evaluator),
            top_k: retrieval.top_k,
            similarity_threshold: retrieval.similarity_threshold,
        })
    }

    /// Trim and length-check a raw query
    pub fn validate(raw_query: &str) -> Result<&str> {
        let query = raw_query.trim();
        if query.is_empty() {
            return Err(AppError::validation("query", "Query cannot be empty"));
        }
        let chars = query.chars().count();
        if chars > MAX_QUERY_CHARS {
            return Err(AppError::validation(
                "query",
                format!("Query is {} characters, the limit is {}", chars, MAX_QUERY_CHARS),
            ));
        }
        Ok(query)
    }

    /// Route and retrieve for a query
    pub async fn plan(&self, raw_query: &str) -> Result<QueryPlan> {
        let query = Self::validate(raw_query)?;

        let routing = async {
            let features = self.extractor.extract(query);
            let (decision, tier) = self.router.route(&features);
            (features, decision, tier)
        };
        let ((features, decision, tier), retrieved) = tokio::join!(routing, self.retrieve(query));
        let (passages, retrieval_ms) = retrieved?;

        let retrieval_count = passages.len();
        tracing::info!(
            classification = %decision.classification,
            rule = decision.rule,
            model = %tier.model,
            retrieval_count,
            retrieval_ms,
            "Query planned"
        );

        Ok(QueryPlan {
            query: query.to_string(),
            features,
            decision,
            tier,
            passages,
            retrieval_count,
            retrieval_ms,
        })
    }

    /// Annotate a generated answer
    pub fn evaluate(&self, plan: &QueryPlan, answer: &str) -> FlagSet {
        self.evaluator.evaluate(answer, &plan.passages, plan.retrieval_count)
    }

    async fn retrieve(&self, query: &str) -> Result<(Vec<RetrievedPassage>, u64)> {
        let start = Instant::now();

        let embedding = self.embedder.embed(query).await?;
        let passages = self
            .retriever
            .retrieve(&embedding, self.top_k, self.similarity_threshold)?;
        let passages = self.reranker.rerank(query, passages);

        let elapsed = start.elapsed();
        clearpath_common::metrics::record_retrieval(elapsed.as_secs_f64(), passages.len());
        Ok((passages, elapsed.as_millis() as u64))
    }
}
