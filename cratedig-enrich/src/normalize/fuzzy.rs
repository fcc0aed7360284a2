//! Ensemble fuzzy string matching
//!
//! Four similarity measures on a 0-100 scale, best one wins:
//! - plain ratio (normalized Levenshtein)
//! - partial ratio (best window of the longer string)
//! - token sort ratio (word order ignored)
//! - token set ratio (extra words ignored)
//!
//! Inputs are normalized first, so callers may pass raw titles.

use super::title_parser::normalize;
use serde::Serialize;
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

/// Default acceptance threshold
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 85.0;

/// Shorter strings than this compare with plain ratio instead of partial
const MIN_PARTIAL_LEN: usize = 4;

/// Individual scores of one comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FuzzyScores {
    pub ratio: f64,
    pub partial: f64,
    pub token_sort: f64,
    pub token_set: f64,
}

impl FuzzyScores {
    /// Best of the ensemble
    pub fn best(&self) -> f64 {
        self.ratio
            .max(self.partial)
            .max(self.token_sort)
            .max(self.token_set)
    }
}

/// An accepted candidate from `fuzzy_match`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    /// Index into the candidate slice
    pub index: usize,
    pub candidate: String,
    pub score: f64,
}

/// Plain edit-distance similarity
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b) * 100.0
}

/// Best ratio between the shorter string and any equal-length window of the longer
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    let long_chars: Vec<char> = long.chars().collect();

    if short_len < MIN_PARTIAL_LEN || short_len == long_chars.len() {
        return ratio(a, b);
    }

    let mut best: f64 = 0.0;
    for start in 0..=(long_chars.len() - short_len) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        best = best.max(ratio(short, &window));
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Ratio after sorting words
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Ratio over shared and differing word sets
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let common = join(set_a.intersection(&set_b));
    let only_a = join(set_a.difference(&set_b));
    let only_b = join(set_b.difference(&set_a));

    let with_a = concat(&common, &only_a);
    let with_b = concat(&common, &only_b);

    ratio(&common, &with_a)
        .max(ratio(&common, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join<'a, 'b: 'a>(words: impl Iterator<Item = &'a &'b str>) -> String {
    words.copied().collect::<Vec<_>>().join(" ")
}

fn concat(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

/// All four scores for two strings, after normalization
pub fn fuzzy_scores(a: &str, b: &str) -> FuzzyScores {
    let a = normalize(a);
    let b = normalize(b);
    FuzzyScores {
        ratio: ratio(&a, &b),
        partial: partial_ratio(&a, &b),
        token_sort: token_sort_ratio(&a, &b),
        token_set: token_set_ratio(&a, &b),
    }
}

/// Ensemble similarity on a 0-100 scale
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    fuzzy_scores(a, b).best()
}

/// Candidates scoring at or above `threshold`, best first
pub fn fuzzy_match<S: AsRef<str>>(query: &str, candidates: &[S], threshold: f64) -> Vec<FuzzyMatch> {
    let mut matches: Vec<FuzzyMatch> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let candidate = candidate.as_ref();
            let score = fuzzy_score(query, candidate);
            if score >= threshold {
                Some(FuzzyMatch {
                    index,
                    candidate: candidate.to_string(),
                    score,
                })
            } else {
                tracing::debug!(query, candidate, score, threshold, "Fuzzy candidate below threshold");
                None
            }
        })
        .collect();

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches
}
