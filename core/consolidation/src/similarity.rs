//! Multi-metric text similarity.
//!
//! Every function here is total: any pair of strings (empty, whitespace-only,
//! very long, emoji) yields a finite score in `[0, 1]`, and every score is
//! symmetric in its arguments.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const JACCARD_WEIGHT: f64 = 0.4;
pub const COSINE_WEIGHT: f64 = 0.4;
pub const LEVENSHTEIN_WEIGHT: f64 = 0.2;

/// Inputs longer than this many chars use the approximate edit similarity.
pub const EXACT_EDIT_DISTANCE_LIMIT: usize = 500;

/// All four scores for one pair, mostly for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityBreakdown {
    pub jaccard: f64,
    pub cosine: f64,
    pub levenshtein: f64,
    pub combined: f64,
}

pub fn breakdown(a: &str, b: &str) -> SimilarityBreakdown {
    let jaccard = jaccard(a, b);
    let cosine = cosine(a, b);
    let levenshtein = levenshtein(a, b);
    SimilarityBreakdown {
        jaccard,
        cosine,
        levenshtein,
        combined: weighted(jaccard, cosine, levenshtein),
    }
}

/// Token-set overlap: |A ∩ B| / |A ∪ B| over lowercase whitespace tokens.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokenize(a).collect();
    let set_b: HashSet<String> = tokenize(b).collect();

    if let Some(score) = empty_rule(set_a.is_empty(), set_b.is_empty()) {
        return score;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f64 / union as f64
}

/// Cosine of the term-frequency vectors.
pub fn cosine(a: &str, b: &str) -> f64 {
    let tf_a = term_frequencies(a);
    let tf_b = term_frequencies(b);

    if let Some(score) = empty_rule(tf_a.is_empty(), tf_b.is_empty()) {
        return score;
    }

    // Integer sums keep the result independent of map iteration order.
    let dot: u64 = tf_a
        .iter()
        .filter_map(|(term, count_a)| tf_b.get(term).map(|count_b| count_a * count_b))
        .sum();
    let norm_a: u64 = tf_a.values().map(|c| c * c).sum();
    let norm_b: u64 = tf_b.values().map(|c| c * c).sum();

    let denominator = ((norm_a as f64) * (norm_b as f64)).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }

    (dot as f64 / denominator).clamp(0.0, 1.0)
}

/// `1 - distance / max(len)`, exact for short inputs and estimated from word
/// statistics beyond `EXACT_EDIT_DISTANCE_LIMIT` chars.
pub fn levenshtein(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();
    let longest = chars_a.len().max(chars_b.len());

    if longest > EXACT_EDIT_DISTANCE_LIMIT {
        return approximate_edit_similarity(a, b, chars_a.len(), chars_b.len());
    }

    let distance = edit_distance(&chars_a, &chars_b);
    (1.0 - distance as f64 / longest as f64).clamp(0.0, 1.0)
}

/// `0.4 * jaccard + 0.4 * cosine + 0.2 * levenshtein`, clamped to `[0, 1]`.
pub fn combined(a: &str, b: &str) -> f64 {
    weighted(jaccard(a, b), cosine(a, b), levenshtein(a, b))
}

/// `combined` for possibly-missing text: `None` behaves like `""`.
pub fn combined_opt(a: Option<&str>, b: Option<&str>) -> f64 {
    combined(a.unwrap_or(""), b.unwrap_or(""))
}

fn weighted(jaccard: f64, cosine: f64, levenshtein: f64) -> f64 {
    if !(jaccard.is_finite() && cosine.is_finite() && levenshtein.is_finite()) {
        return 0.0;
    }

    let score =
        JACCARD_WEIGHT * jaccard + COSINE_WEIGHT * cosine + LEVENSHTEIN_WEIGHT * levenshtein;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Both empty is a perfect match, exactly one empty is no match.
fn empty_rule(a_empty: bool, b_empty: bool) -> Option<f64> {
    match (a_empty, b_empty) {
        (true, true) => Some(1.0),
        (true, false) | (false, true) => Some(0.0),
        (false, false) => None,
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_lowercase)
}

fn term_frequencies(text: &str) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_default() += 1;
    }
    counts
}

fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Bounded-cost stand-in for edit similarity on long inputs: averages the
/// ratios of char length, word count and mean word length.
fn approximate_edit_similarity(a: &str, b: &str, len_a: usize, len_b: usize) -> f64 {
    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();

    let length_ratio = ratio(len_a as f64, len_b as f64);
    let count_ratio = ratio(words_a.len() as f64, words_b.len() as f64);
    let word_length_ratio = ratio(mean_word_length(&words_a), mean_word_length(&words_b));

    let estimate = (length_ratio + count_ratio + word_length_ratio) / 3.0;
    if estimate.is_finite() {
        estimate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn mean_word_length(words: &[&str]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let total: usize = words.iter().map(|w| w.chars().count()).sum();
    total as f64 / words.len() as f64
}

fn ratio(x: f64, y: f64) -> f64 {
    let larger = x.max(y);
    if larger <= 0.0 {
        1.0
    } else {
        x.min(y) / larger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn sample_pairs() -> Vec<(String, String)> {
        vec![
            ("I love apples".into(), "I love bananas".into()),
            ("".into(), "something".into()),
            ("   ".into(), "".into()),
            ("Works at Acme Corp".into(), "works at acme corp as an engineer".into()),
            ("café ☕ every morning 🎉".into(), "Café every morning".into()),
            ("x".repeat(600), "x y ".repeat(200)),
            ("The user runs on weekends. ".repeat(400), "The user swims daily".into()),
        ]
    }

    #[test]
    fn test_jaccard_example() {
        assert!(approx(jaccard("I love apples", "I love bananas"), 0.5));
    }

    #[test]
    fn test_empty_rules() {
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(cosine("", ""), 1.0);
        assert_eq!(levenshtein("", ""), 1.0);
        assert_eq!(combined("", ""), 1.0);

        assert_eq!(jaccard("", "tea"), 0.0);
        assert_eq!(cosine("tea", ""), 0.0);
        assert_eq!(levenshtein("", "tea"), 0.0);
        assert_eq!(combined("tea", ""), 0.0);
    }

    #[test]
    fn test_missing_inputs_behave_like_empty() {
        assert_eq!(combined_opt(None, None), 1.0);
        assert_eq!(combined_opt(None, Some("likes hiking")), 0.0);
        assert_eq!(combined_opt(Some("likes hiking"), None), 0.0);
    }

    #[test]
    fn test_symmetry() {
        for (a, b) in sample_pairs() {
            assert_eq!(jaccard(&a, &b), jaccard(&b, &a), "jaccard {:?}", a);
            assert_eq!(cosine(&a, &b), cosine(&b, &a), "cosine {:?}", a);
            assert_eq!(levenshtein(&a, &b), levenshtein(&b, &a), "levenshtein {:?}", a);
            assert_eq!(combined(&a, &b), combined(&b, &a), "combined {:?}", a);
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        for (a, _) in sample_pairs() {
            assert!(approx(jaccard(&a, &a), 1.0));
            assert!(approx(cosine(&a, &a), 1.0));
            assert!(approx(levenshtein(&a, &a), 1.0));
            assert!(approx(combined(&a, &a), 1.0));
        }
    }

    #[test]
    fn test_combined_bounded_for_awkward_inputs() {
        let long = "lorem ipsum dolor ".repeat(700);
        let inputs = [
            "",
            " ",
            "\t\n",
            "🎉🎉🎉",
            "日本語のテキスト",
            long.as_str(),
            "a",
        ];

        for a in inputs {
            for b in inputs {
                let score = combined(a, b);
                assert!(score.is_finite());
                assert!((0.0..=1.0).contains(&score), "{} out of range", score);
            }
        }
    }

    #[test]
    fn test_cosine_counts_repeats() {
        // [2, 1] . [1, 1] / (sqrt(5) * sqrt(2))
        let expected = 3.0 / 10f64.sqrt();
        assert!(approx(cosine("tea tea coffee", "tea coffee"), expected));
    }

    #[test]
    fn test_levenshtein_exact() {
        // kitten -> sitting is 3 edits over 7 chars
        assert!(approx(levenshtein("kitten", "sitting"), 1.0 - 3.0 / 7.0));
        assert!(approx(levenshtein("abc", "abd"), 1.0 - 1.0 / 3.0));
    }

    #[test]
    fn test_levenshtein_long_inputs_use_estimate() {
        let a = "word ".repeat(150);
        let b = "word ".repeat(300);
        let score = levenshtein(&a, &b);
        // length 750 vs 1500, count 150 vs 300, identical word lengths
        assert!(approx(score, (0.5 + 0.5 + 1.0) / 3.0));
    }

    #[test]
    fn test_breakdown_matches_combined() {
        let parts = breakdown("Enjoys hiking in the Alps", "enjoys hiking in the alps");
        assert!(approx(parts.combined, combined("Enjoys hiking in the Alps", "enjoys hiking in the alps")));
        assert_eq!(parts.jaccard, 1.0);
        assert!(parts.levenshtein < 1.0);
    }
}
