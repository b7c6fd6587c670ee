//! Static phrase lists used by routing, re-ranking and evaluation
//!
//! The built-in lists are the production defaults. A deployment may replace
//! any of them from a file at startup; the resulting [`Lexicon`] is then
//! immutable and handed to each component's constructor.

use clearpath_common::errors::Result;
use config::{Config, File};
use serde::{Deserialize, Serialize};

/// Complete set of phrase lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicon {
    pub routing: RoutingLexicon,
    pub evaluator: EvaluatorLexicon,

    /// Query words that never count as significant for re-ranking
    pub stop_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingLexicon {
    /// Matched on whole-word boundaries
    pub complexity_keywords: Vec<String>,

    /// Matched as substrings
    pub ambiguity_markers: Vec<String>,

    /// Matched as substrings
    pub complaint_markers: Vec<String>,

    /// Regular expressions applied to the lowercased query
    pub comparison_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorLexicon {
    /// Matched as case-insensitive substrings of the answer
    pub refusal_phrases: Vec<String>,

    /// Proper-noun spans that never count as hallucinated
    pub allowed_terms: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "compare", "comparison", "difference", "differences", "versus", "vs",
    "integrate", "integration", "configure", "configuration", "migrate",
    "migration", "troubleshoot", "troubleshooting", "architecture",
    "workflow", "optimize", "optimization", "analyze", "analysis",
    "strategy", "strategies", "compliance", "security", "audit",
    "enterprise", "scalability", "performance", "benchmark", "custom",
    "advanced", "multiple", "several", "complex", "detailed", "comprehensive",
    "explain how", "walk me through", "step by step", "in depth",
];

const AMBIGUITY_MARKERS: &[&str] = &[
    "it depends", "what if", "hypothetically", "in general",
    "is it possible", "can you explain", "could you elaborate",
    "what are the pros and cons", "trade-off", "tradeoff",
    "best practice", "best practices", "recommend", "recommendation",
    "should i", "which one", "what would",
];

const COMPLAINT_MARKERS: &[&str] = &[
    "not working", "broken", "bug", "issue", "problem", "error",
    "frustrated", "disappointed", "unacceptable", "terrible",
    "worst", "angry", "complaint", "escalate", "refund",
    "cancel", "cancellation", "speak to manager", "supervisor",
];

const COMPARISON_PATTERNS: &[&str] = &[
    r"\bvs\.?\b",
    r"\bversus\b",
    r"\bcompared?\s+to\b",
    r"\bdifference\s+between\b",
    r"\bbetter\s+than\b",
    r"\bworse\s+than\b",
    r"\bor\b.*\bor\b",
];

const REFUSAL_PHRASES: &[&str] = &[
    "i cannot",
    "i can't",
    "i don't have information",
    "i don't have enough information",
    "i do not have",
    "i'm not sure",
    "i am not sure",
    "i'm unable to",
    "i am unable to",
    "outside my knowledge",
    "beyond my scope",
    "not able to help",
    "cannot assist with",
    "no information available",
    "unfortunately, i don't",
    "i apologize, but i",
    "i'm sorry, but i don't",
];

const ALLOWED_TERMS: &[&str] = &["Clearpath", "Clearpath Assistant"];

// Only words of four or more characters are candidates, so shorter stop
// words need no entry.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "another", "anything",
    "around", "because", "been", "before", "being", "below", "between", "both",
    "could", "does", "doing", "done", "down", "during", "each", "even", "every",
    "from", "further", "give", "have", "having", "help", "here", "into", "just",
    "know", "like", "make", "many", "more", "most", "much", "must", "need",
    "only", "other", "over", "please", "same", "should", "show", "some", "something",
    "such", "tell", "than", "thank", "thanks", "that", "their", "them", "then",
    "there", "these", "they", "thing", "this", "those", "through", "under",
    "until", "very", "want", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your", "yours",
];

impl Default for RoutingLexicon {
    fn default() -> Self {
        Self {
            complexity_keywords: owned(COMPLEXITY_KEYWORDS),
            ambiguity_markers: owned(AMBIGUITY_MARKERS),
            complaint_markers: owned(COMPLAINT_MARKERS),
            comparison_patterns: owned(COMPARISON_PATTERNS),
        }
    }
}

impl Default for EvaluatorLexicon {
    fn default() -> Self {
        Self {
            refusal_phrases: owned(REFUSAL_PHRASES),
            allowed_terms: owned(ALLOWED_TERMS),
        }
    }
}

impl Lexicon {
    /// Built-in lists
    pub fn builtin() -> Self {
        Self {
            routing: RoutingLexicon::default(),
            evaluator: EvaluatorLexicon::default(),
            stop_words: owned(STOP_WORDS),
        }
    }

    /// Load a lexicon file. Lists the file omits keep their built-in values.
    pub fn from_file(path: &str) -> Result<Self> {
        let defaults = Config::try_from(&Self::builtin())?;
        let lexicon: Self = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()?;

        tracing::info!(
            path,
            complexity_keywords = lexicon.routing.complexity_keywords.len(),
            refusal_phrases = lexicon.evaluator.refusal_phrases.len(),
            stop_words = lexicon.stop_words.len(),
            "Lexicon loaded"
        );
        Ok(lexicon)
    }

    /// Load from `path` when set, otherwise use the built-in lists
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }
}
