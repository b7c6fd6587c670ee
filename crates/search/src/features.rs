//! Lexical feature extraction for query routing

use crate::lexicon::RoutingLexicon;
use clearpath_common::errors::{AppError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

// A run of terminators before whitespace or end of text; each terminator
// in the run is counted.
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.?!]+(?:\s|$)").expect("valid sentence-end pattern"));

/// Features derived purely from the query text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSet {
    pub word_count: usize,
    pub char_count: usize,
    pub question_mark_count: usize,
    pub sentence_count: usize,
    pub has_complexity_keyword: bool,
    pub has_ambiguity_marker: bool,
    pub has_complaint_marker: bool,
    pub has_comparison_pattern: bool,
}

/// Compiled form of a [`RoutingLexicon`]
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    complexity: Option<Regex>,
    ambiguity_markers: Vec<String>,
    complaint_markers: Vec<String>,
    comparison: Vec<Regex>,
}

impl FeatureExtractor {
    pub fn new(lexicon: &RoutingLexicon) -> Result<Self> {
        let keywords: Vec<String> = lexicon
            .complexity_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();

        let complexity = if keywords.is_empty() {
            None
        } else {
            Some(compile(&format!(r"\b(?:{})\b", keywords.join("|")))?)
        };

        let comparison = lexicon
            .comparison_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            complexity,
            ambiguity_markers: lowercase_all(&lexicon.ambiguity_markers),
            complaint_markers: lowercase_all(&lexicon.complaint_markers),
            comparison,
        })
    }

    /// Derive the feature set. Total for any input string.
    pub fn extract(&self, query: &str) -> FeatureSet {
        let lower = query.to_lowercase();

        FeatureSet {
            word_count: query.split_whitespace().count(),
            char_count: query.chars().count(),
            question_mark_count: query.matches('?').count(),
            sentence_count: sentence_count(query),
            has_complexity_keyword: self
                .complexity
                .as_ref()
                .is_some_and(|re| re.is_match(&lower)),
            has_ambiguity_marker: self.ambiguity_markers.iter().any(|m| lower.contains(m.as_str())),
            has_complaint_marker: self.complaint_markers.iter().any(|m| lower.contains(m.as_str())),
            has_comparison_pattern: self.comparison.iter().any(|re| re.is_match(&lower)),
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(&RoutingLexicon::default()).expect("built-in routing lexicon compiles")
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Configuration {
        message: format!("Invalid routing pattern {:?}: {}", pattern, e),
    })
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Terminal punctuation followed by whitespace or end of text.
///
/// `"What? Why? How?"` counts 3 and `"Really?!"` counts 2.
pub fn sentence_count(text: &str) -> usize {
    SENTENCE_END
        .find_iter(text)
        .map(|m| m.as_str().chars().filter(|c| matches!(c, '.' | '?' | '!')).count())
        .sum()
}
