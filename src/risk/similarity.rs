//! Title similarity for duplicate detection.
//!
//! Score is the Jaccard index of the normalized token sets of two titles:
//! lower-cased runs of letters and digits (any script) with common stop-words removed. Titles with no
//! meaningful tokens score 0.0 against everything.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "from", "in", "into", "is", "of", "on", "or",
    "the", "to", "under", "with", "within",
];

/// Normalized token set of a title.
pub fn tokens(title: &str) -> BTreeSet<String> {
    let lower = title.to_lowercase();
    TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two titles in `[0, 1]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_titles_score_one() {
        assert_eq!(
            title_similarity("Uncapped indemnity", "Uncapped Indemnity!"),
            1.0
        );
    }

    #[test]
    fn stop_words_and_punctuation_ignored() {
        assert_eq!(
            title_similarity(
                "Limitation of liability in the supply agreement",
                "Limitation liability, supply agreement"
            ),
            1.0
        );
    }

    #[test]
    fn partial_overlap() {
        // {change, control, clause} vs {change, control, consent}
        let score = title_similarity("Change of control clause", "Change of control consent");
        assert!((score - 0.5).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn disjoint_and_empty() {
        assert_eq!(title_similarity("GDPR transfer gap", "Patent expiry"), 0.0);
        assert_eq!(title_similarity("", "Patent expiry"), 0.0);
        assert_eq!(title_similarity("the of", "the of"), 0.0);
    }

    #[test]
    fn non_ascii_letters_kept() {
        assert!(tokens("Übernahme der Haftung").contains("übernahme"));
        assert_eq!(title_similarity("Übernahmeklausel", "ÜBERNAHMEKLAUSEL!"), 1.0);
        assert_eq!(title_similarity("知的財産", "知的財産"), 1.0);
    }
}
