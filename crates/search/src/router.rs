//! Deterministic query router
//!
//! Classifies a query as `simple` or `complex` from its [`FeatureSet`] by
//! walking an ordered rule list; the first rule that applies decides. No
//! model is consulted, so the cost of a query is predictable before any
//! generation call is made.

use crate::features::FeatureSet;
use clearpath_common::config::{RoutingConfig, TierConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Simple,
    Complex,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Simple => "simple",
            Classification::Complex => "complex",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model identifier and output budget for one classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationTier {
    pub model: String,
    pub max_output_tokens: u32,
}

impl From<&TierConfig> for GenerationTier {
    fn from(tier: &TierConfig) -> Self {
        Self {
            model: tier.model.clone(),
            max_output_tokens: tier.max_output_tokens,
        }
    }
}

/// Static classification to tier mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    simple: GenerationTier,
    complex: GenerationTier,
}

impl TierTable {
    pub fn new(simple: GenerationTier, complex: GenerationTier) -> Self {
        Self { simple, complex }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new((&config.simple).into(), (&config.complex).into())
    }

    pub fn tier(&self, classification: Classification) -> &GenerationTier {
        match classification {
            Classification::Simple => &self.simple,
            Classification::Complex => &self.complex,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

/// A classification together with the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub classification: Classification,
    pub rule: &'static str,
}

struct Rule {
    name: &'static str,
    applies: fn(&FeatureSet) -> bool,
    outcome: Classification,
}

const RULES: &[Rule] = &[
    Rule { name: "short_plain", applies: short_plain, outcome: Classification::Simple },
    Rule { name: "complaint", applies: complaint, outcome: Classification::Complex },
    Rule { name: "multi_question", applies: multi_question, outcome: Classification::Complex },
    Rule { name: "comparison", applies: comparison, outcome: Classification::Complex },
    Rule { name: "complexity_score", applies: high_complexity_score, outcome: Classification::Complex },
    Rule { name: "long_ambiguous", applies: long_ambiguous, outcome: Classification::Complex },
];

const DEFAULT_RULE: &str = "default";

fn short_plain(f: &FeatureSet) -> bool {
    f.word_count <= 3 && f.question_mark_count <= 1 && !f.has_complexity_keyword
}

fn complaint(f: &FeatureSet) -> bool {
    f.has_complaint_marker
}

fn multi_question(f: &FeatureSet) -> bool {
    f.question_mark_count >= 3
}

fn comparison(f: &FeatureSet) -> bool {
    f.has_comparison_pattern
}

fn high_complexity_score(f: &FeatureSet) -> bool {
    complexity_score(f) >= 2
}

// Unreachable while an ambiguity marker alone scores 2 above
fn long_ambiguous(f: &FeatureSet) -> bool {
    f.word_count > 25 && f.has_ambiguity_marker
}

/// Weighted count of complexity indicators
pub fn complexity_score(f: &FeatureSet) -> u32 {
    2 * u32::from(f.has_complexity_keyword)
        + 2 * u32::from(f.has_ambiguity_marker)
        + u32::from(f.word_count > 40)
        + u32::from(f.sentence_count >= 3)
}

/// Evaluate the rule list top to bottom
pub fn decide(features: &FeatureSet) -> Decision {
    RULES
        .iter()
        .find(|rule| (rule.applies)(features))
        .map(|rule| Decision { classification: rule.outcome, rule: rule.name })
        .unwrap_or(Decision { classification: Classification::Simple, rule: DEFAULT_RULE })
}

pub fn classify(features: &FeatureSet) -> Classification {
    decide(features).classification
}

/// Router bound to a tier table
#[derive(Debug, Clone, Default)]
pub struct Router {
    tiers: TierTable,
}

impl Router {
    pub fn new(tiers: TierTable) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Classify and pick the tier, recording the decision
    pub fn route(&self, features: &FeatureSet) -> (Decision, GenerationTier) {
        let decision = decide(features);
        let tier = self.tiers.tier(decision.classification).clone();

        tracing::debug!(
            classification = %decision.classification,
            rule = decision.rule,
            model = %tier.model,
            word_count = features.word_count,
            question_marks = features.question_mark_count,
            "Query routed"
        );
        clearpath_common::metrics::record_classification(
            decision.classification.as_str(),
            decision.rule,
        );

        (decision, tier)
    }
}
