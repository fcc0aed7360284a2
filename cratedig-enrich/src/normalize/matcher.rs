//! Candidate ranking against a normalized track identity
//!
//! Every provider candidate is compared on title (ensemble fuzzy score), artist,
//! label hint, year and duration. Agreement on the secondary attributes becomes
//! disambiguation evidence for the scorer.

use super::fuzzy::{fuzzy_score, DEFAULT_FUZZY_THRESHOLD};
use super::title_parser::parse;
use super::vocabulary::labels_match;
use crate::scoring::{AgreementFactor, DisambiguationFactors};
use crate::types::{MatchCandidate, TrackIdentityCandidate};
use serde::Serialize;
use tracing::debug;

/// Ranking bonus when the candidate's label matches the title's label hint
pub const LABEL_MATCH_BONUS: f64 = 0.05;

/// Title share of the combined score when an artist is known
const TITLE_WEIGHT: f64 = 0.7;
const ARTIST_WEIGHT: f64 = 0.3;

/// Release years this far apart still agree
const YEAR_TOLERANCE: i32 = 1;

/// Durations this many seconds apart still agree
const DURATION_TOLERANCE_SECS: u32 = 5;

/// Why a candidate was dropped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Rejection {
    /// Title similarity under threshold
    Title { score: f64 },
    /// Artist similarity under threshold
    Artist { score: f64 },
    /// Candidate label contradicts the label hint
    Label { hint: String, label: String },
}

/// A candidate that survived ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub candidate: MatchCandidate,
    /// Ensemble title score (0-100)
    pub title_score: f64,
    /// Ensemble artist score (0-100), when an artist was known
    pub artist_score: Option<f64>,
    /// `Some(true)` when the label hint matched, `None` when not comparable
    pub label_agrees: Option<bool>,
    /// Ranking value (0.0-1.05)
    pub combined: f64,
    /// Evidence for the disambiguated-search tier
    pub factors: DisambiguationFactors,
}

/// Ranks provider candidates for one track
pub struct CandidateMatcher {
    threshold: f64,
}

impl CandidateMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare one candidate against the identity
    pub fn evaluate(
        &self,
        identity: &TrackIdentityCandidate,
        candidate: &MatchCandidate,
        candidate_count: usize,
    ) -> Result<RankedCandidate, Rejection> {
        let candidate_title = parse(&candidate.title).normalized;
        let title_score = fuzzy_score(&identity.search_key, &candidate_title);
        if title_score < self.threshold {
            return Err(Rejection::Title { score: title_score });
        }

        let mut agreements = Vec::new();

        let artist_score = match identity.artist.as_deref() {
            Some(artist) if !candidate.artists.is_empty() => {
                let joined = candidate.artists.join(", ");
                let best = candidate
                    .artists
                    .iter()
                    .map(|a| fuzzy_score(artist, a))
                    .fold(fuzzy_score(artist, &joined), f64::max);
                if best < self.threshold {
                    return Err(Rejection::Artist { score: best });
                }
                agreements.push(AgreementFactor::Artist);
                Some(best)
            }
            _ => None,
        };

        let label_agrees = match (identity.label_hint.as_deref(), candidate.label.as_deref()) {
            (Some(hint), Some(label)) => {
                if !labels_match(hint, label) {
                    return Err(Rejection::Label {
                        hint: hint.to_string(),
                        label: label.to_string(),
                    });
                }
                agreements.push(AgreementFactor::Label);
                Some(true)
            }
            _ => None,
        };

        if let (Some(a), Some(b)) = (identity.year, candidate.year) {
            if (a - b).abs() <= YEAR_TOLERANCE {
                agreements.push(AgreementFactor::Year);
            }
        }

        if let (Some(a), Some(b)) = (identity.duration_secs, candidate.duration_secs) {
            if a.abs_diff(b) <= DURATION_TOLERANCE_SECS {
                agreements.push(AgreementFactor::Duration);
            }
        }

        let mut combined = match artist_score {
            Some(artist) => (TITLE_WEIGHT * title_score + ARTIST_WEIGHT * artist) / 100.0,
            None => title_score / 100.0,
        };
        if label_agrees == Some(true) {
            combined += LABEL_MATCH_BONUS;
        }

        Ok(RankedCandidate {
            candidate: candidate.clone(),
            title_score,
            artist_score,
            label_agrees,
            combined,
            factors: DisambiguationFactors {
                candidate_count,
                agreements,
            },
        })
    }

    /// Surviving candidates, best first
    pub fn rank(
        &self,
        identity: &TrackIdentityCandidate,
        candidates: &[MatchCandidate],
    ) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .iter()
            .filter_map(|candidate| match self.evaluate(identity, candidate, candidates.len()) {
                Ok(ranked) => Some(ranked),
                Err(rejection) => {
                    debug!(
                        provider = %candidate.provider,
                        candidate = %candidate.title,
                        ?rejection,
                        "Candidate rejected"
                    );
                    None
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.combined
                .partial_cmp(&a.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

impl Default for CandidateMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(title: &str, artist: Option<&str>, label: Option<&str>) -> TrackIdentityCandidate {
        let parsed = parse(title);
        TrackIdentityCandidate {
            title: parsed.title.clone(),
            search_key: parsed.normalized,
            artist: artist.map(str::to_string),
            duration_secs: Some(300),
            year: Some(2012),
            label_hint: label.map(str::to_string),
        }
    }

    fn candidate(title: &str, artist: &str, label: Option<&str>) -> MatchCandidate {
        MatchCandidate {
            title: title.to_string(),
            artists: vec![artist.to_string()],
            label: label.map(str::to_string),
            provider: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_label_mismatch_is_rejected() {
        let matcher = CandidateMatcher::default();
        let id = identity("Control", None, Some("Viper"));
        let result = matcher.evaluate(&id, &candidate("Control", "Matrix", Some("Hospital Records")), 1);
        assert!(matches!(result, Err(Rejection::Label { .. })));
    }

    #[test]
    fn test_label_match_adds_bonus_and_factor() {
        let matcher = CandidateMatcher::default();
        let id = identity("Control", None, Some("Viper"));
        let with_label = matcher
            .evaluate(&id, &candidate("Control", "Matrix", Some("Viper Recordings")), 2)
            .unwrap();
        let without_label = matcher
            .evaluate(&id, &candidate("Control", "Matrix", None), 2)
            .unwrap();

        assert_eq!(with_label.label_agrees, Some(true));
        assert_eq!(without_label.label_agrees, None);
        assert!((with_label.combined - without_label.combined - LABEL_MATCH_BONUS).abs() < 1e-9);
        assert!(with_label.factors.agreements.contains(&AgreementFactor::Label));
    }

    #[test]
    fn test_artist_mismatch_is_rejected() {
        let matcher = CandidateMatcher::default();
        let id = identity("Levels", Some("Avicii"), None);
        let result = matcher.evaluate(&id, &candidate("Levels", "Sub Focus", None), 1);
        assert!(matches!(result, Err(Rejection::Artist { .. })));
    }

    #[test]
    fn test_year_and_duration_agreement() {
        let matcher = CandidateMatcher::default();
        let id = identity("Levels", None, None);
        let mut c = candidate("Levels", "Avicii", None);
        c.year = Some(2011);
        c.duration_secs = Some(302);
        let ranked = matcher.evaluate(&id, &c, 1).unwrap();
        assert!(ranked.factors.agreements.contains(&AgreementFactor::Year));
        assert!(ranked.factors.agreements.contains(&AgreementFactor::Duration));
    }

    #[test]
    fn test_rank_orders_by_combined_score() {
        let matcher = CandidateMatcher::default();
        let id = identity("Levels", Some("Avicii"), None);
        let candidates = vec![
            candidate("Levells", "Avicii", None),
            candidate("Levels (Original Mix)", "Avicii", None),
            candidate("Something Else", "Avicii", None),
        ];
        let ranked = matcher.rank(&id, &candidates);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].candidate.title, "Levels (Original Mix)");
        assert_eq!(ranked[0].factors.candidate_count, 3);
    }
}
