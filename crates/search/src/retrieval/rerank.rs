//! Source-name keyword boost

use super::{by_score, RetrievedPassage};
use std::collections::HashSet;

/// Minimum length for a query word to count as significant
pub const MIN_SIGNIFICANT_LEN: usize = 4;

/// Boosts passages whose source document name mentions a significant query
/// word, e.g. a "pricing" question favours `pricing_guide.pdf`.
#[derive(Debug, Clone)]
pub struct Reranker {
    boost: f32,
    stop_words: HashSet<String>,
}

impl Reranker {
    pub fn new(boost: f32, stop_words: &[String]) -> Self {
        Self {
            boost,
            stop_words: stop_words.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Lowercased alphanumeric tokens of at least four characters that are
    /// not stop words, in first-occurrence order
    pub fn significant_words(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        query
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|w| w.chars().count() >= MIN_SIGNIFICANT_LEN)
            .filter(|w| !self.stop_words.contains(w))
            .filter(|w| seen.insert(w.clone()))
            .collect()
    }

    /// Apply the boost once per passage and re-sort. The passage set is
    /// unchanged; passages without a match keep their score.
    pub fn rerank(&self, query: &str, mut passages: Vec<RetrievedPassage>) -> Vec<RetrievedPassage> {
        let words = self.significant_words(query);

        for passage in passages.iter_mut().filter(|p| !p.boosted) {
            let name = passage.source_file().trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            if let Some(word) = words.iter().find(|w| name.contains(w.as_str())) {
                passage.score += self.boost;
                passage.boosted = true;
                tracing::debug!(
                    chunk_id = %passage.chunk.id,
                    source_file = %passage.chunk.source_file,
                    keyword = %word,
                    score = passage.score,
                    "Re-rank boost applied"
                );
            }
        }

        passages.sort_by(by_score);
        passages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::Lexicon;
    use crate::retrieval::test_support::passage;

    fn reranker() -> Reranker {
        Reranker::new(0.05, &Lexicon::builtin().stop_words)
    }

    #[test]
    fn test_significant_words() {
        let words = reranker().significant_words("What are the PRICING tiers, and what's the pricing for teams?");
        assert_eq!(words, vec!["pricing", "tiers", "teams"]);
    }

    #[test]
    fn test_boost_reorders_matching_source() {
        let faq = passage("general faq", "faq.pdf", 0.62, 0);
        let pricing = passage("plan prices", "Pricing_Guide.pdf", 0.60, 1);

        let ranked = reranker().rerank("pricing for the pro plan", vec![faq.clone(), pricing.clone()]);
        assert_eq!(ranked[0].chunk.id, pricing.chunk.id);
        assert!((ranked[0].score - 0.65).abs() < 1e-6);
        assert_eq!(ranked[0].similarity, 0.60);
        // Non-matching passage keeps its score
        assert_eq!(ranked[1].score, 0.62);
    }

    #[test]
    fn test_rerank_preserves_passage_set() {
        let input = vec![
            passage("a", "security_whitepaper.pdf", 0.8, 0),
            passage("b", "onboarding.pdf", 0.7, 1),
            passage("c", "security_faq.pdf", 0.5, 2),
        ];
        let mut before: Vec<_> = input.iter().map(|p| p.chunk.id).collect();
        let ranked = reranker().rerank("security onboarding", input);
        let mut after: Vec<_> = ranked.iter().map(|p| p.chunk.id).collect();

        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_boost_applies_once() {
        let r = reranker();
        let once = r.rerank("pricing", vec![passage("x", "pricing.pdf", 0.5, 0)]);
        let twice = r.rerank("pricing", once.clone());
        assert_eq!(once[0].score, twice[0].score);
    }

    #[test]
    fn test_ties_keep_retrieval_rank() {
        let ranked = reranker().rerank(
            "unrelated",
            vec![passage("p", "a.pdf", 0.5, 3), passage("q", "b.pdf", 0.5, 2)],
        );
        assert_eq!(ranked[0].retrieval_rank, 2);
        assert_eq!(ranked[1].retrieval_rank, 3);
    }

    #[test]
    fn test_malformed_source_gets_no_boost() {
        let ranked = reranker().rerank("pricing", vec![passage("x", "   ", 0.5, 0)]);
        assert_eq!(ranked[0].score, 0.5);
        assert!(!ranked[0].boosted);
    }
}
