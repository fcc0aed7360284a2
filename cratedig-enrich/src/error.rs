//! Error types for cratedig-enrich
//!
//! Routine outcomes (provider failure, empty answer, open breaker, rejected
//! match) are values, not errors; see `orchestrator::ProviderOutcome`. The types
//! here cover what can genuinely go wrong inside a component.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Provider call errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Transport failure (connection refused, DNS, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Provider asked us to slow down
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Call exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Cooldown queue errors
#[derive(Debug, Error)]
pub enum CooldownError {
    /// Backing store failed
    #[error("Cooldown store error: {0}")]
    Store(#[from] cratedig_common::Error),

    /// Operation referenced a track with no cooldown entry
    #[error("No cooldown entry for track {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for CooldownError {
    fn from(err: sqlx::Error) -> Self {
        CooldownError::Store(cratedig_common::Error::Database(err))
    }
}

/// Statistical record-linkage fit errors
///
/// Every variant sends the analyzer to its fixed-weight fallback.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FitError {
    /// Too few comparison records to estimate parameters
    #[error("Insufficient data: {records} records (need {required})")]
    InsufficientData { records: usize, required: usize },

    /// Every record has the same agreement pattern
    #[error("Degenerate data: {0}")]
    Degenerate(String),

    /// Expectation-maximization did not settle within the iteration budget
    #[error("EM did not converge after {0} iterations")]
    NotConverged(usize),

    /// Fit exceeded its time budget
    #[error("Fit timed out after {0:?}")]
    TimedOut(Duration),

    /// A parameter became NaN or left the unit interval
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}
