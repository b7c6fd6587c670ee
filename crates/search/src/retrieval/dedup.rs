//! Near-duplicate passage removal

use super::{by_score, RetrievedPassage};
use std::collections::HashSet;

/// Jaccard similarity of the two texts' character sets. Two empty texts score 0.
pub fn char_jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<char> = a.chars().collect();
    let b: HashSet<char> = b.chars().collect();

    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Drop the lower-scored member of every near-duplicate pair.
///
/// Passages are visited best first; each is kept unless it is a
/// near-duplicate of an already kept passage. A dropped passage is never
/// compared again, so it cannot cause further drops. Output is ordered by
/// score, ties by retrieval rank.
pub fn deduplicate(mut passages: Vec<RetrievedPassage>, threshold: f32) -> Vec<RetrievedPassage> {
    passages.sort_by(by_score);
    let threshold = f64::from(threshold);

    let mut kept: Vec<RetrievedPassage> = Vec::with_capacity(passages.len());
    for candidate in passages {
        let duplicate_of = kept
            .iter()
            .find(|k| char_jaccard(k.text(), candidate.text()) > threshold);

        match duplicate_of {
            Some(existing) => {
                tracing::debug!(
                    dropped = %candidate.chunk.id,
                    kept = %existing.chunk.id,
                    dropped_score = candidate.score,
                    kept_score = existing.score,
                    "Near-duplicate passage dropped"
                );
            }
            None => kept.push(candidate),
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::test_support::passage;

    #[test]
    fn test_jaccard() {
        assert_eq!(char_jaccard("", ""), 0.0);
        assert_eq!(char_jaccard("abc", "abc"), 1.0);
        assert_eq!(char_jaccard("ab", "cd"), 0.0);
        // {a,b,c} vs {b,c,d}: 2 shared of 4
        assert!((char_jaccard("abc", "bcd") - 0.5).abs() < 1e-9);
        // Character sets ignore order and repetition
        assert_eq!(char_jaccard("aabb", "ba"), 1.0);
    }

    #[test]
    fn test_lower_scored_duplicate_is_dropped() {
        let a = passage("abcdefghij", "a.pdf", 0.70, 1);
        let b = passage("abcdefghijk", "b.pdf", 0.90, 0);
        let kept = deduplicate(vec![a, b.clone()], 0.80);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.id, b.chunk.id);
    }

    #[test]
    fn test_dropped_passage_causes_no_further_drops() {
        // A~B and B~C exceed 0.8, A~C does not
        let a = passage("abcdefghij", "a.pdf", 0.9, 0);
        let b = passage("abcdefghijk", "b.pdf", 0.8, 1);
        let c = passage("bcdefghijkl", "c.pdf", 0.7, 2);
        assert!(char_jaccard(a.text(), b.text()) > 0.8); // 10/11
        assert!(char_jaccard(b.text(), c.text()) > 0.8); // 10/12
        assert!(char_jaccard(a.text(), c.text()) <= 0.8); // 9/12

        let kept = deduplicate(vec![a.clone(), b, c.clone()], 0.80);
        let ids: Vec<_> = kept.iter().map(|p| p.chunk.id).collect();
        assert_eq!(ids, vec![a.chunk.id, c.chunk.id]);
    }

    #[test]
    fn test_no_surviving_pair_exceeds_threshold() {
        let texts = [
            "pricing starts at forty nine",
            "pricing starts at forty-nine",
            "the enterprise plan adds sso",
            "enterprise plan adds sso, audit",
            "contact support by email",
        ];
        let passages: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| passage(t, "doc.pdf", 0.9 - i as f32 * 0.05, i))
            .collect();

        let kept = deduplicate(passages, 0.80);
        for (i, x) in kept.iter().enumerate() {
            for y in &kept[i + 1..] {
                assert!(char_jaccard(x.text(), y.text()) <= 0.80);
            }
        }
    }

    #[test]
    fn test_equal_scores_keep_earlier_rank() {
        let first = passage("same text", "a.pdf", 0.5, 0);
        let second = passage("same text", "b.pdf", 0.5, 1);
        let kept = deduplicate(vec![second, first.clone()], 0.80);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.id, first.chunk.id);
    }
}
