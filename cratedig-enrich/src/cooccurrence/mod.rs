//! Co-occurrence identity resolution for unreleased "ID" tracks
//!
//! - `features`: per (context, candidate) agreement records with name blocking
//! - `fellegi_sunter`: EM-fitted record linkage model
//! - `analyzer`: candidate ranking with a fixed-weight fallback

pub mod analyzer;
pub mod features;
pub mod fellegi_sunter;

pub use analyzer::{
    ArtistProbability, CooccurrenceAnalyzer, CooccurrenceConfig, CooccurrenceResult,
    ProbabilitySource,
};
pub use features::{FeatureRecord, FALLBACK_WEIGHTS, FEATURE_NAMES};
pub use fellegi_sunter::{FellegiSunterModel, FitOptions};
