//! Confidence scoring

pub mod confidence;

pub use confidence::{
    apply_contextual_boost, quality_tier, should_flag_for_review, AgreementFactor,
    AttributionMethod, ConfidenceScore, ConfidenceScorer, DisambiguationFactors, QualityTier,
    DEFAULT_REVIEW_THRESHOLD, MAX_AUTOMATED,
};

use crate::types::EnrichField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Acceptance policy for attributions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Accepted attributions below this are flagged for review
    pub review_threshold: f64,
    /// Minimum final confidence per field name; missing fields use `default_minimum`
    pub field_minimums: BTreeMap<String, f64>,
    pub default_minimum: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let field_minimums = [
            (EnrichField::Artist, 0.70),
            (EnrichField::Title, 0.60),
            (EnrichField::Label, 0.70),
            (EnrichField::Year, 0.60),
            (EnrichField::Genre, 0.50),
        ]
        .into_iter()
        .map(|(field, min)| (field.as_str().to_string(), min))
        .collect();

        Self {
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            field_minimums,
            default_minimum: 0.60,
        }
    }
}

impl ScoringConfig {
    /// Minimum final confidence for a field
    pub fn minimum_for(&self, field: EnrichField) -> f64 {
        self.field_minimums
            .get(field.as_str())
            .copied()
            .unwrap_or(self.default_minimum)
    }

    pub fn needs_review(&self, score: &ConfidenceScore) -> bool {
        should_flag_for_review(score.final_value, self.review_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_minimums_fall_back_to_default() {
        let mut config = ScoringConfig::default();
        assert_eq!(config.minimum_for(EnrichField::Artist), 0.70);
        config.field_minimums.remove("genre");
        assert_eq!(config.minimum_for(EnrichField::Genre), 0.60);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ScoringConfig = toml::from_str("review_threshold = 0.5").unwrap();
        assert_eq!(config.review_threshold, 0.5);
        assert_eq!(config.minimum_for(EnrichField::Label), 0.70);
    }
}
