//! Tiered confidence scoring
//!
//! Converts a raw match into a single 0.0-1.0 value. Each attribution method has
//! its own documented formula:
//!
//! | Method              | Formula                                                          |
//! |---------------------|------------------------------------------------------------------|
//! | Exact identifier    | 0.99 full, 0.95 partial                                          |
//! | Disambiguated       | 0.90, -0.05 (>=6 candidates) / -0.10 (>=11), +0.03 (>=2 factors), cap 0.95 |
//! | Community database  | 0.85, +0.05 verification link, +0.05 x popularity, cap 0.93      |
//! | Fuzzy match         | threshold → 0.60 ... 100 → 0.80, below threshold → 0.0 (rejected) |
//! | Statistical model   | model probability                                                |
//! | Contextual inference| 0.40 + 0.20 x strength, cap 0.60                                 |
//! | Manual verification | 1.0                                                              |
//!
//! Every automated score is clamped to [0.0, 0.99]; only manual verification
//! reaches 1.0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::IdentifierMatch;

/// Ceiling for every automated score
pub const MAX_AUTOMATED: f64 = 0.99;

const EXACT_FULL: f64 = 0.99;
const EXACT_PARTIAL: f64 = 0.95;

const DISAMBIGUATED_BASE: f64 = 0.90;
const DISAMBIGUATED_CAP: f64 = 0.95;
const AMBIGUITY_PENALTY_MODERATE: f64 = 0.05;
const AMBIGUITY_PENALTY_HIGH: f64 = 0.10;
const MODERATE_AMBIGUITY_CANDIDATES: usize = 6;
const HIGH_AMBIGUITY_CANDIDATES: usize = 11;
const AGREEMENT_BONUS: f64 = 0.03;
const STRONG_AGREEMENT_FACTORS: usize = 2;

const COMMUNITY_BASE: f64 = 0.85;
const COMMUNITY_CAP: f64 = 0.93;
const VERIFICATION_BONUS: f64 = 0.05;
const POPULARITY_BONUS_MAX: f64 = 0.05;

const FUZZY_FLOOR: f64 = 0.60;
const FUZZY_CEILING: f64 = 0.80;

const CONTEXTUAL_BASE: f64 = 0.40;
const CONTEXTUAL_STRENGTH_MAX: f64 = 0.20;
const CONTEXTUAL_CAP: f64 = 0.60;

const BOOST_MAX: f64 = 0.10;
const LOW_COHERENCE_PENALTY: f64 = 0.10;
const STRONG_SIGNAL: f64 = 0.70;
const LOW_COHERENCE: f64 = 0.30;

/// Default score below which an attribution is flagged for human review
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.60;

// ============================================================================
// Types
// ============================================================================

/// How an attribution was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    ExactIdentifier,
    Disambiguated,
    CommunityDatabase,
    FuzzyMatch,
    StatisticalModel,
    ContextualInference,
    ManualVerification,
}

impl AttributionMethod {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionMethod::ExactIdentifier => "exact_identifier",
            AttributionMethod::Disambiguated => "disambiguated",
            AttributionMethod::CommunityDatabase => "community_database",
            AttributionMethod::FuzzyMatch => "fuzzy_match",
            AttributionMethod::StatisticalModel => "statistical_model",
            AttributionMethod::ContextualInference => "contextual_inference",
            AttributionMethod::ManualVerification => "manual_verification",
        }
    }

    /// Parse the string representation
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "exact_identifier" => AttributionMethod::ExactIdentifier,
            "disambiguated" => AttributionMethod::Disambiguated,
            "community_database" => AttributionMethod::CommunityDatabase,
            "fuzzy_match" => AttributionMethod::FuzzyMatch,
            "statistical_model" => AttributionMethod::StatisticalModel,
            "contextual_inference" => AttributionMethod::ContextualInference,
            "manual_verification" => AttributionMethod::ManualVerification,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AttributionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contextual evidence agreeing with a search result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementFactor {
    Artist,
    Label,
    Year,
    Genre,
    Duration,
}

/// Inputs to the disambiguated-search tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationFactors {
    /// How many candidates the search returned
    pub candidate_count: usize,
    /// Which contextual signals agreed with the chosen candidate
    pub agreements: Vec<AgreementFactor>,
}

/// Human-facing quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityTier {
    Uncertain,
    Low,
    Medium,
    High,
    Verified,
}

impl QualityTier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Verified => "Verified",
            QualityTier::High => "High",
            QualityTier::Medium => "Medium",
            QualityTier::Low => "Low",
            QualityTier::Uncertain => "Uncertain",
        }
    }
}

/// A scored attribution
///
/// Created once, read-only afterwards, persisted for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Tier value before contextual boost
    pub value: f64,
    /// Attribution method tag
    pub method: AttributionMethod,
    /// Provider (or verifier) the value came from
    pub source: String,
    /// Disambiguation inputs, for the disambiguated tier
    pub factors: Option<DisambiguationFactors>,
    /// Raw fuzzy score (0-100), for the fuzzy tier
    pub fuzzy_raw: Option<f64>,
    /// Model probability, for the statistical tier
    pub model_probability: Option<f64>,
    /// Contextual boost applied on top of `value`
    pub contextual_boost: f64,
    /// Value after boost and clamping
    pub final_value: f64,
    /// When the score was produced
    pub created_at: DateTime<Utc>,
}

impl ConfidenceScore {
    fn new(method: AttributionMethod, source: &str, value: f64) -> Self {
        Self {
            value,
            method,
            source: source.to_string(),
            factors: None,
            fuzzy_raw: None,
            model_probability: None,
            contextual_boost: 0.0,
            final_value: value,
            created_at: Utc::now(),
        }
    }

    /// True for a fuzzy match that fell below threshold
    pub fn is_rejected(&self) -> bool {
        self.final_value <= 0.0
    }

    /// Quality band of the final value
    pub fn quality_tier(&self) -> QualityTier {
        quality_tier(self.final_value)
    }

    /// Return a copy with the contextual boost applied
    ///
    /// Manual verification and rejected scores are returned unchanged.
    pub fn with_contextual_boost(&self, dj_affinity: f64, coherence: f64) -> Self {
        if self.method == AttributionMethod::ManualVerification || self.is_rejected() {
            return self.clone();
        }
        let final_value = apply_contextual_boost(self.value, dj_affinity, coherence);
        Self {
            contextual_boost: final_value - self.value,
            final_value,
            ..self.clone()
        }
    }
}

// ============================================================================
// Scorer
// ============================================================================

/// Confidence scorer
pub struct ConfidenceScorer {
    /// Fuzzy acceptance threshold on the 0-100 scale (default 85)
    fuzzy_threshold: f64,
}

impl ConfidenceScorer {
    /// Create a scorer with the default fuzzy threshold (85)
    pub fn new() -> Self {
        Self::with_fuzzy_threshold(85.0)
    }

    /// Create a scorer with a custom fuzzy threshold
    pub fn with_fuzzy_threshold(threshold: f64) -> Self {
        Self {
            // Keep a non-empty interpolation interval below 100
            fuzzy_threshold: threshold.clamp(0.0, 99.0),
        }
    }

    /// Fuzzy acceptance threshold
    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    /// Exact provider-identifier match
    pub fn score_exact(&self, source: &str, matched: IdentifierMatch) -> ConfidenceScore {
        let value = match matched {
            IdentifierMatch::Full => EXACT_FULL,
            IdentifierMatch::Partial => EXACT_PARTIAL,
        };
        ConfidenceScore::new(AttributionMethod::ExactIdentifier, source, value)
    }

    /// Search result disambiguated with contextual agreement
    pub fn score_disambiguated(
        &self,
        source: &str,
        factors: &DisambiguationFactors,
    ) -> ConfidenceScore {
        let mut value = DISAMBIGUATED_BASE;

        if factors.candidate_count >= HIGH_AMBIGUITY_CANDIDATES {
            value -= AMBIGUITY_PENALTY_HIGH;
        } else if factors.candidate_count >= MODERATE_AMBIGUITY_CANDIDATES {
            value -= AMBIGUITY_PENALTY_MODERATE;
        }

        let mut distinct = factors.agreements.clone();
        distinct.sort_by_key(|f| *f as u8);
        distinct.dedup();
        if distinct.len() >= STRONG_AGREEMENT_FACTORS {
            value += AGREEMENT_BONUS;
        }

        let mut score = ConfidenceScore::new(
            AttributionMethod::Disambiguated,
            source,
            clamp_automated(value.min(DISAMBIGUATED_CAP)),
        );
        score.factors = Some(factors.clone());
        score
    }

    /// Community-database match
    ///
    /// `popularity` is evidence normalized to 0.0-1.0 and contributes up to +0.05.
    pub fn score_community(
        &self,
        source: &str,
        has_verification_link: bool,
        popularity: Option<f64>,
    ) -> ConfidenceScore {
        let mut value = COMMUNITY_BASE;
        if has_verification_link {
            value += VERIFICATION_BONUS;
        }
        if let Some(p) = popularity.filter(|p| p.is_finite()) {
            value += POPULARITY_BONUS_MAX * p.clamp(0.0, 1.0);
        }
        ConfidenceScore::new(
            AttributionMethod::CommunityDatabase,
            source,
            clamp_automated(value.min(COMMUNITY_CAP)),
        )
    }

    /// Fuzzy string match on the 0-100 scale
    ///
    /// Below threshold the score is 0.0 and `is_rejected()` is true.
    pub fn score_fuzzy(&self, source: &str, fuzzy_score: f64) -> ConfidenceScore {
        let mut score = ConfidenceScore::new(
            AttributionMethod::FuzzyMatch,
            source,
            self.fuzzy_confidence(fuzzy_score),
        );
        score.fuzzy_raw = Some(fuzzy_score);
        score
    }

    /// Map a raw fuzzy score to confidence
    ///
    /// Linear interpolation: threshold → 0.60, 100 → 0.80, below threshold → 0.0.
    pub fn fuzzy_confidence(&self, fuzzy_score: f64) -> f64 {
        if !fuzzy_score.is_finite() || fuzzy_score < self.fuzzy_threshold {
            return 0.0;
        }
        let span = 100.0 - self.fuzzy_threshold;
        let t = ((fuzzy_score.min(100.0) - self.fuzzy_threshold) / span).clamp(0.0, 1.0);
        FUZZY_FLOOR + t * (FUZZY_CEILING - FUZZY_FLOOR)
    }

    /// Statistical-model prediction: the model probability itself
    pub fn score_model(&self, source: &str, probability: f64) -> ConfidenceScore {
        let value = if probability.is_finite() {
            clamp_automated(probability)
        } else {
            0.0
        };
        let mut score = ConfidenceScore::new(AttributionMethod::StatisticalModel, source, value);
        score.model_probability = Some(probability);
        score
    }

    /// Contextual inference with `strength` in 0.0-1.0
    pub fn score_contextual(&self, source: &str, strength: f64) -> ConfidenceScore {
        let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 0.0 };
        let value = (CONTEXTUAL_BASE + CONTEXTUAL_STRENGTH_MAX * strength).min(CONTEXTUAL_CAP);
        ConfidenceScore::new(AttributionMethod::ContextualInference, source, value)
    }

    /// Manual verification always scores 1.0
    pub fn score_manual(&self, verifier: &str) -> ConfidenceScore {
        ConfidenceScore::new(AttributionMethod::ManualVerification, verifier, 1.0)
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Free functions
// ============================================================================

/// Apply DJ-affinity and set-coherence evidence to a base score
///
/// - affinity >= 0.70 adds up to +0.10 (linear from 0.70 to 1.0)
/// - coherence >= 0.70 adds up to +0.10 (linear from 0.70 to 1.0)
/// - coherence < 0.30 subtracts 0.10
///
/// The result is clamped to [0.0, 0.99].
pub fn apply_contextual_boost(base: f64, dj_affinity: f64, coherence: f64) -> f64 {
    let base = if base.is_finite() { base } else { 0.0 };
    let mut boost = strong_signal_boost(dj_affinity) + strong_signal_boost(coherence);
    if coherence.is_finite() && coherence < LOW_COHERENCE {
        boost -= LOW_COHERENCE_PENALTY;
    }
    clamp_automated(base + boost)
}

fn strong_signal_boost(signal: f64) -> f64 {
    if !signal.is_finite() || signal < STRONG_SIGNAL {
        return 0.0;
    }
    BOOST_MAX * ((signal.min(1.0) - STRONG_SIGNAL) / (1.0 - STRONG_SIGNAL))
}

/// Quality band: Verified >=0.95, High >=0.85, Medium >=0.70, Low >=0.50, else Uncertain
pub fn quality_tier(score: f64) -> QualityTier {
    if score >= 0.95 {
        QualityTier::Verified
    } else if score >= 0.85 {
        QualityTier::High
    } else if score >= 0.70 {
        QualityTier::Medium
    } else if score >= 0.50 {
        QualityTier::Low
    } else {
        QualityTier::Uncertain
    }
}

/// True when a score should go to a human reviewer
pub fn should_flag_for_review(score: f64, threshold: f64) -> bool {
    score < threshold
}

fn clamp_automated(value: f64) -> f64 {
    value.clamp(0.0, MAX_AUTOMATED)
}
