//! Clearpath query core
//!
//! Deterministic routing, vector retrieval with re-ranking, and
//! post-generation answer evaluation.

pub mod evaluation;
pub mod features;
pub mod lexicon;
pub mod pipeline;
pub mod retrieval;
pub mod router;

pub use evaluation::{EvaluatorFlag, FlagSet, OutputEvaluator, Severity};
pub use features::{FeatureExtractor, FeatureSet};
pub use lexicon::Lexicon;
pub use pipeline::{QueryPipeline, QueryPlan};
pub use retrieval::{Reranker, RetrievedPassage, VectorRetriever};
pub use router::{Classification, Decision, GenerationTier, Router, TierTable};
