//! Feature records for co-occurrence identity resolution
//!
//! Candidates are the observing DJs and the artists of the tracks played
//! immediately around the unresolved occurrence. A (context, candidate) pair is
//! only compared when the candidate's name is similar to a name seen in that
//! context. Within a compared pair every feature requires the same artist:
//! equal after normalization, or one typo in a long alphabetic word.

use crate::normalize::{normalize, vocabulary::labels_match};
use crate::types::{is_placeholder_artist, DjSetContext};
use serde::Serialize;
use std::collections::BTreeMap;
use strsim::{damerau_levenshtein, jaro_winkler};

/// Jaro-Winkler similarity a context name needs for its pair to be compared
pub const BLOCKING_SIMILARITY: f64 = 0.92;

/// Shortest word in which a single-character typo is tolerated
const MIN_TYPO_WORD_LEN: usize = 5;

/// Names of the binary agreement features, in vector order
pub const FEATURE_NAMES: [&str; 5] = [
    "dj_is_candidate",
    "preceded_by",
    "followed_by",
    "label_continuity",
    "dj_owns_label",
];

/// Fixed weights used when the statistical fit is unavailable
pub const FALLBACK_WEIGHTS: [f64; 5] = [0.15, 0.25, 0.25, 0.20, 0.15];

/// Comparison record for one candidate in one context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    /// Index of the context in the analyzer input
    pub context_index: usize,
    pub set_id: String,
    /// Canonical candidate name
    pub candidate: String,
    /// The observing DJ is the candidate
    pub dj_is_candidate: bool,
    /// Candidate's track was played immediately before
    pub preceded_by: bool,
    /// Candidate's track was played immediately after
    pub followed_by: bool,
    /// A neighboring track is on a label the candidate releases on
    pub label_continuity: bool,
    /// The observing DJ owns a neighboring track's label
    pub dj_owns_label: bool,
    /// Normalized set position (0.0 opener, 1.0 closer)
    pub position: f64,
    /// Neighbor label that produced `label_continuity`
    pub continuity_label: Option<String>,
}

impl FeatureRecord {
    /// Binary agreement vector, ordered as `FEATURE_NAMES`
    pub fn agreement(&self) -> [bool; 5] {
        [
            self.dj_is_candidate,
            self.preceded_by,
            self.followed_by,
            self.label_continuity,
            self.dj_owns_label,
        ]
    }

    /// Weighted-sum probability used when no model is fitted
    pub fn fallback_probability(&self) -> f64 {
        self.agreement()
            .iter()
            .zip(FALLBACK_WEIGHTS.iter())
            .filter(|(present, _)| **present)
            .map(|(_, weight)| weight)
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }

    /// Any direct evidence tying the candidate to this context
    pub fn is_supporting(&self) -> bool {
        self.dj_is_candidate || self.preceded_by || self.followed_by
    }

    /// Human-readable evidence lines
    pub fn evidence(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.dj_is_candidate {
            lines.push(format!("played by {} in set {}", self.candidate, self.set_id));
        }
        if self.preceded_by {
            lines.push(format!("preceded by {} in set {}", self.candidate, self.set_id));
        }
        if self.followed_by {
            lines.push(format!("followed by {} in set {}", self.candidate, self.set_id));
        }
        if let (true, Some(label)) = (self.label_continuity, self.continuity_label.as_deref()) {
            lines.push(format!("label continuity on {} in set {}", label, self.set_id));
        }
        if self.dj_owns_label {
            lines.push(format!("DJ owns neighboring label in set {}", self.set_id));
        }
        lines
    }
}

/// True when two artist names refer to the same artist
///
/// Names must normalize to the same words, except that one word of at least
/// five letters may differ by a single edit. Numbers and short words must
/// match exactly, so "DJ 1" and "DJ 10" stay distinct.
pub fn same_artist(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let left: Vec<&str> = a.split_whitespace().collect();
    let right: Vec<&str> = b.split_whitespace().collect();
    if left.len() != right.len() {
        return false;
    }

    let mut typos = 0;
    for (l, r) in left.iter().zip(&right) {
        if l == r {
            continue;
        }
        if !is_typo(l, r) {
            return false;
        }
        typos += 1;
    }
    typos <= 1
}

fn is_typo(a: &str, b: &str) -> bool {
    let alphabetic = |w: &str| w.chars().all(char::is_alphabetic);
    alphabetic(a)
        && alphabetic(b)
        && a.chars().count().min(b.chars().count()) >= MIN_TYPO_WORD_LEN
        && damerau_levenshtein(a, b) <= 1
}

/// True when `candidate` is close enough to a name in `ctx` to be compared there
fn in_block(ctx: &DjSetContext, candidate: &str) -> bool {
    let candidate = normalize(candidate);
    ctx.predecessor()
        .into_iter()
        .chain(ctx.successor())
        .map(|t| t.artist.as_str())
        .chain(std::iter::once(ctx.dj.name.as_str()))
        .any(|name| jaro_winkler(&normalize(name), &candidate) >= BLOCKING_SIMILARITY)
}

/// Candidate artists across all contexts, spelling variants merged
///
/// The first spelling seen becomes the canonical name.
pub fn candidate_artists(contexts: &[DjSetContext]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut consider = |name: &str| {
        let name = name.trim();
        if name.is_empty() || is_placeholder_artist(name) {
            return;
        }
        if !candidates.iter().any(|existing| same_artist(existing, name)) {
            candidates.push(name.to_string());
        }
    };

    for ctx in contexts {
        consider(&ctx.dj.name);
        if let Some(prev) = ctx.predecessor() {
            consider(&prev.artist);
        }
        if let Some(next) = ctx.successor() {
            consider(&next.artist);
        }
    }
    candidates
}

/// Labels each candidate is known to release on, from every track in every context
fn candidate_labels(contexts: &[DjSetContext], candidate: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut add = |label: &str| {
        if !labels.iter().any(|l| labels_match(l, label)) {
            labels.push(label.to_string());
        }
    };

    for ctx in contexts {
        for track in ctx.preceding.iter().chain(ctx.following.iter()) {
            if let Some(label) = track.label.as_deref() {
                if same_artist(&track.artist, candidate) {
                    add(label);
                }
            }
        }
        if same_artist(&ctx.dj.name, candidate) {
            for label in &ctx.dj.owned_labels {
                add(label);
            }
        }
    }
    labels
}

/// One feature record per compared (context, candidate) pair
pub fn build_records(contexts: &[DjSetContext], candidates: &[String]) -> Vec<FeatureRecord> {
    let labels_by_candidate: BTreeMap<&str, Vec<String>> = candidates
        .iter()
        .map(|c| (c.as_str(), candidate_labels(contexts, c)))
        .collect();

    let mut records = Vec::new();
    for (context_index, ctx) in contexts.iter().enumerate() {
        let prev = ctx.predecessor();
        let next = ctx.successor();
        let neighbor_labels: Vec<&str> = prev
            .into_iter()
            .chain(next)
            .filter_map(|t| t.label.as_deref())
            .collect();

        let dj_owns_label = neighbor_labels
            .iter()
            .any(|nl| ctx.dj.owned_labels.iter().any(|owned| labels_match(owned, nl)));

        for candidate in candidates.iter().filter(|c| in_block(ctx, c)) {
            let known_labels = labels_by_candidate
                .get(candidate.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let continuity_label = neighbor_labels
                .iter()
                .find(|nl| known_labels.iter().any(|kl| labels_match(kl, nl)))
                .map(|nl| nl.to_string());

            records.push(FeatureRecord {
                context_index,
                set_id: ctx.set_id.clone(),
                candidate: candidate.clone(),
                dj_is_candidate: same_artist(&ctx.dj.name, candidate),
                preceded_by: prev.is_some_and(|t| same_artist(&t.artist, candidate)),
                followed_by: next.is_some_and(|t| same_artist(&t.artist, candidate)),
                label_continuity: continuity_label.is_some(),
                dj_owns_label,
                position: ctx.normalized_position(),
                continuity_label,
            });
        }
    }
    records
}
