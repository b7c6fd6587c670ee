//! Post-generation answer evaluation
//!
//! Three independent checks annotate an answer with advisory flags. Flags
//! never alter or withhold the answer text.

use crate::lexicon::EvaluatorLexicon;
use crate::retrieval::RetrievedPassage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::LazyLock;

static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\d+(?:\.\d{2})?(?:\s*/\s*(?:month|year|mo|yr))?").expect("valid price pattern")
});

static PROPER_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("valid proper-noun pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorFlag {
    NoContextWarning,
    RefusalDetected,
    PotentialHallucination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Info,
}

impl EvaluatorFlag {
    pub fn severity(&self) -> Severity {
        match self {
            EvaluatorFlag::NoContextWarning => Severity::Warning,
            EvaluatorFlag::RefusalDetected => Severity::Info,
            EvaluatorFlag::PotentialHallucination => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorFlag::NoContextWarning => "no_context_warning",
            EvaluatorFlag::RefusalDetected => "refusal_detected",
            EvaluatorFlag::PotentialHallucination => "potential_hallucination",
        }
    }
}

impl fmt::Display for EvaluatorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unordered, duplicate-free flag collection
pub type FlagSet = BTreeSet<EvaluatorFlag>;

#[derive(Debug, Clone)]
pub struct OutputEvaluator {
    refusal_phrases: Vec<String>,
    allowed_terms: HashSet<String>,
}

impl OutputEvaluator {
    pub fn new(lexicon: &EvaluatorLexicon) -> Self {
        Self {
            refusal_phrases: lexicon
                .refusal_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            allowed_terms: lexicon.allowed_terms.iter().cloned().collect(),
        }
    }

    /// Run every check; none short-circuits another
    pub fn evaluate(
        &self,
        answer: &str,
        passages: &[RetrievedPassage],
        retrieval_count: usize,
    ) -> FlagSet {
        let mut flags = FlagSet::new();

        if retrieval_count == 0 {
            flags.insert(EvaluatorFlag::NoContextWarning);
        }
        if self.detects_refusal(answer) {
            flags.insert(EvaluatorFlag::RefusalDetected);
        }
        if self.detects_hallucination(answer, passages) {
            flags.insert(EvaluatorFlag::PotentialHallucination);
        }

        for flag in &flags {
            clearpath_common::metrics::record_flag(flag.as_str());
        }
        if !flags.is_empty() {
            tracing::info!(
                flags = ?flags.iter().map(EvaluatorFlag::as_str).collect::<Vec<_>>(),
                retrieval_count,
                "Answer flagged"
            );
        }
        flags
    }

    pub fn detects_refusal(&self, answer: &str) -> bool {
        let lower = answer.to_lowercase();
        self.refusal_phrases.iter().any(|p| lower.contains(p.as_str()))
    }

    /// A price or multi-word proper noun in the answer that the passages
    /// do not support
    pub fn detects_hallucination(&self, answer: &str, passages: &[RetrievedPassage]) -> bool {
        let context = passages
            .iter()
            .map(RetrievedPassage::text)
            .collect::<Vec<_>>()
            .join(" ");

        self.unsupported_price(answer, &context).is_some()
            || self.unsupported_name(answer, &context).is_some()
    }

    fn unsupported_price<'a>(&self, answer: &'a str, context: &str) -> Option<&'a str> {
        let known: HashSet<&str> = PRICE.find_iter(context).map(|m| m.as_str()).collect();
        let found = PRICE
            .find_iter(answer)
            .map(|m| m.as_str())
            .find(|price| !known.contains(price));

        if let Some(price) = found {
            tracing::debug!(price, "Answer cites a price absent from the passages");
        }
        found
    }

    fn unsupported_name<'a>(&self, answer: &'a str, context: &str) -> Option<&'a str> {
        let found = PROPER_NOUN
            .find_iter(answer)
            .map(|m| m.as_str())
            .find(|name| !self.allowed_terms.contains(*name) && !context.contains(name));

        if let Some(name) = found {
            tracing::debug!(name, "Answer names an entity absent from the passages");
        }
        found
    }
}

impl Default for OutputEvaluator {
    fn default() -> Self {
        Self::new(&EvaluatorLexicon::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::test_support::passage;

    fn evaluator() -> OutputEvaluator {
        OutputEvaluator::default()
    }

    fn context(texts: &[&str]) -> Vec<RetrievedPassage> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| passage(t, "pricing_guide.pdf", 0.8, i))
            .collect()
    }

    #[test]
    fn test_no_context_depends_only_on_count() {
        let passages = context(&["Clearpath supports SSO."]);
        assert!(evaluator()
            .evaluate("Clearpath supports SSO.", &passages, 0)
            .contains(&EvaluatorFlag::NoContextWarning));
        assert!(!evaluator()
            .evaluate("", &[], 1)
            .contains(&EvaluatorFlag::NoContextWarning));
    }

    #[test]
    fn test_scenario_empty_retrieval_warns_regardless_of_answer() {
        for answer in ["", "Sure, here you go.", "I cannot help with that."] {
            let flags = evaluator().evaluate(answer, &[], 0);
            assert!(flags.contains(&EvaluatorFlag::NoContextWarning));
        }
    }

    #[test]
    fn test_refusal_detection() {
        let e = evaluator();
        assert!(e.detects_refusal("I don't have enough information in our documentation."));
        assert!(e.detects_refusal("Unfortunately, I DON'T know."));
        assert!(!e.detects_refusal("The Pro plan includes SSO."));
    }

    #[test]
    fn test_refusal_flag_set_once() {
        let flags = evaluator().evaluate(
            "I cannot say. I'm not sure. I am unable to help.",
            &context(&["anything"]),
            1,
        );
        assert_eq!(flags.iter().filter(|f| **f == EvaluatorFlag::RefusalDetected).count(), 1);
    }

    #[test]
    fn test_scenario_unsupported_price() {
        let passages = context(&["The Starter plan is free for up to three users."]);
        let flags = evaluator().evaluate("The Pro plan costs $49/month.", &passages, 1);
        assert!(flags.contains(&EvaluatorFlag::PotentialHallucination));
    }

    #[test]
    fn test_supported_price_is_not_flagged() {
        let passages = context(&["Pro costs $49/month when billed monthly."]);
        let flags = evaluator().evaluate("It is $49/month.", &passages, 1);
        assert!(flags.is_empty());
    }

    #[test]
    fn test_price_prefix_does_not_count_as_support() {
        let passages = context(&["Enterprise costs $499/month."]);
        assert!(evaluator().detects_hallucination("Pro costs $49.", &passages));
    }

    #[test]
    fn test_proper_nouns() {
        let passages = context(&["Single sign-on is configured under Admin Console settings."]);
        let e = evaluator();
        assert!(!e.detects_hallucination("Open the Admin Console.", &passages));
        assert!(e.detects_hallucination("Open the Billing Portal.", &passages));
        // Allowlisted product name
        assert!(!e.detects_hallucination("Clearpath Assistant can help.", &passages));
        // Spans are greedy, so a leading capitalized word becomes part of the name
        assert!(e.detects_hallucination("Ask Clearpath Assistant.", &passages));
    }

    #[test]
    fn test_checks_are_independent() {
        let flags = evaluator().evaluate("I cannot confirm, but Pro is $12/mo.", &[], 0);
        assert_eq!(
            flags.into_iter().collect::<Vec<_>>(),
            vec![
                EvaluatorFlag::NoContextWarning,
                EvaluatorFlag::RefusalDetected,
                EvaluatorFlag::PotentialHallucination
            ]
        );
    }

    #[test]
    fn test_severities_and_serialization() {
        assert_eq!(EvaluatorFlag::RefusalDetected.severity(), Severity::Info);
        assert_eq!(EvaluatorFlag::NoContextWarning.severity(), Severity::Warning);
        assert_eq!(
            serde_json::to_string(&EvaluatorFlag::PotentialHallucination).unwrap(),
            "\"potential_hallucination\""
        );
    }

    #[test]
    fn test_custom_lexicon() {
        let lexicon = EvaluatorLexicon {
            refusal_phrases: vec!["no comment".into()],
            allowed_terms: vec!["Billing Portal".into()],
        };
        let e = OutputEvaluator::new(&lexicon);
        assert!(e.detects_refusal("No comment."));
        assert!(!e.detects_refusal("I cannot"));
        assert!(!e.detects_hallucination("Use the Billing Portal.", &[]));
    }
}
