//! Co-occurrence identity resolution
//!
//! Ranks candidate artists for an unresolved track from the DJ sets it was
//! heard in. Record probabilities come from a fitted Fellegi-Sunter model when
//! the fit succeeds, else from fixed feature weights. A candidate's probability
//! combines its supporting records with noisy-OR: `P = 1 - ∏(1 - p_i)`.

use super::features::{build_records, candidate_artists, FeatureRecord};
use super::fellegi_sunter::{fit, FitOptions};
use crate::error::FitError;
use crate::types::DjSetContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Analyzer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooccurrenceConfig {
    /// Fewer contexts than this produce no candidates
    pub min_contexts: usize,
    /// Candidates below this probability are dropped
    pub min_probability: f64,
    pub em_max_iterations: usize,
    pub em_tolerance: f64,
    /// Comparison records needed before the model is fitted
    pub em_min_records: usize,
    pub fit_timeout_ms: u64,
}

impl Default for CooccurrenceConfig {
    fn default() -> Self {
        Self {
            min_contexts: 2,
            min_probability: 0.70,
            em_max_iterations: 200,
            em_tolerance: 1e-6,
            em_min_records: 20,
            fit_timeout_ms: 2000,
        }
    }
}

impl CooccurrenceConfig {
    pub fn fit_timeout(&self) -> Duration {
        Duration::from_millis(self.fit_timeout_ms)
    }

    fn fit_options(&self) -> FitOptions {
        FitOptions {
            max_iterations: self.em_max_iterations,
            tolerance: self.em_tolerance,
            min_records: self.em_min_records,
            timeout: self.fit_timeout(),
        }
    }
}

/// Where record probabilities came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilitySource {
    RecordLinkage,
    FixedWeights,
}

/// One ranked candidate artist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistProbability {
    pub candidate: String,
    pub probability: f64,
    /// Occurrence count / (2 × min_contexts), capped at 1.0
    pub confidence: f64,
    pub evidence: Vec<String>,
    /// Contexts with direct evidence for the candidate
    pub occurrences: usize,
    /// Most frequent neighboring label shared with the candidate
    pub supporting_label: Option<String>,
    /// Supporting contexts / all contexts
    pub context_strength: f64,
}

/// Analyzer output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooccurrenceResult {
    /// Candidates at or above `min_probability`, best first
    pub candidates: Vec<ArtistProbability>,
    pub source: ProbabilitySource,
    /// Why the model was not used, when it was not
    pub fit_error: Option<FitError>,
}

impl CooccurrenceResult {
    fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            source: ProbabilitySource::FixedWeights,
            fit_error: None,
        }
    }

    pub fn top(&self) -> Option<&ArtistProbability> {
        self.candidates.first()
    }
}

/// Co-occurrence analyzer
#[derive(Debug, Clone, Default)]
pub struct CooccurrenceAnalyzer {
    config: CooccurrenceConfig,
}

impl CooccurrenceAnalyzer {
    pub fn new(config: CooccurrenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CooccurrenceConfig {
        &self.config
    }

    /// Rank candidate artists across the observed contexts
    ///
    /// CPU-bound; async callers should run it on a blocking thread.
    pub fn analyze(&self, contexts: &[DjSetContext]) -> CooccurrenceResult {
        if contexts.len() < self.config.min_contexts {
            debug!(
                contexts = contexts.len(),
                required = self.config.min_contexts,
                "Too few contexts for co-occurrence analysis"
            );
            return CooccurrenceResult::empty();
        }

        let candidates = candidate_artists(contexts);
        if candidates.is_empty() {
            return CooccurrenceResult::empty();
        }
        let records = build_records(contexts, &candidates);

        let patterns: Vec<Vec<bool>> = records.iter().map(|r| r.agreement().to_vec()).collect();
        let (probabilities, source, fit_error): (Vec<f64>, _, _) =
            match fit(&patterns, &self.config.fit_options()) {
                Ok(model) => {
                    debug!(
                        iterations = model.iterations,
                        lambda = model.lambda,
                        "Record linkage model fitted"
                    );
                    let probs = records
                        .iter()
                        .map(|r| model.match_probability(&r.agreement()))
                        .collect();
                    (probs, ProbabilitySource::RecordLinkage, None)
                }
                Err(e) => {
                    warn!(error = %e, records = records.len(), "Record linkage fit failed, using fixed weights");
                    let probs = records.iter().map(FeatureRecord::fallback_probability).collect();
                    (probs, ProbabilitySource::FixedWeights, Some(e))
                }
            };

        let mut ranked: Vec<ArtistProbability> = candidates
            .iter()
            .filter_map(|candidate| {
                let supporting: Vec<(&FeatureRecord, f64)> = records
                    .iter()
                    .zip(probabilities.iter().copied())
                    .filter(|(r, _)| &r.candidate == candidate && r.is_supporting())
                    .collect();
                self.summarize(candidate, &supporting, contexts.len())
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.occurrences.cmp(&a.occurrences))
        });
        ranked.retain(|c| c.probability >= self.config.min_probability);

        if let Some(top) = ranked.first() {
            info!(
                candidate = %top.candidate,
                probability = top.probability,
                occurrences = top.occurrences,
                source = ?source,
                "Co-occurrence candidate found"
            );
        }

        CooccurrenceResult {
            candidates: ranked,
            source,
            fit_error,
        }
    }

    fn summarize(
        &self,
        candidate: &str,
        supporting: &[(&FeatureRecord, f64)],
        total_contexts: usize,
    ) -> Option<ArtistProbability> {
        if supporting.is_empty() {
            return None;
        }

        let miss: f64 = supporting.iter().map(|(_, p)| 1.0 - p.clamp(0.0, 1.0)).product();
        let probability = 1.0 - miss;

        let occurrences = supporting.len();
        let confidence =
            (occurrences as f64 / (2 * self.config.min_contexts.max(1)) as f64).min(1.0);

        let mut label_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (record, _) in supporting {
            if let Some(label) = record.continuity_label.as_deref() {
                *label_counts.entry(label).or_default() += 1;
            }
        }
        let supporting_label = label_counts
            .into_iter()
            .fold(None, |best: Option<(&str, usize)>, (label, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((label, count)),
            })
            .map(|(label, _)| label.to_string());

        Some(ArtistProbability {
            candidate: candidate.to_string(),
            probability,
            confidence,
            evidence: supporting.iter().flat_map(|(r, _)| r.evidence()).collect(),
            occurrences,
            supporting_label,
            context_strength: occurrences as f64 / total_contexts as f64,
        })
    }
}
