//! Provider seam for waterfall enrichment
//!
//! A provider answers one lookup per track. A hard failure counts against the
//! breaker; an empty answer is a healthy provider that knows nothing; a breaker
//! rejection means the provider was never called.

use crate::error::ProviderError;
use crate::types::{MatchCandidate, TrackIdentityCandidate};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// How a provider's candidates are scored when no identifier matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Catalog search; contextual agreement decides between disambiguated and fuzzy tiers
    Catalog,
    /// Community-maintained database
    Community,
}

/// Non-empty provider answer
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub candidates: Vec<MatchCandidate>,
}

impl ProviderResponse {
    pub fn new(candidates: Vec<MatchCandidate>) -> Self {
        Self { candidates }
    }
}

/// Lookup input handed to every provider
#[derive(Debug, Clone, Copy)]
pub struct LookupQuery<'a> {
    pub identity: &'a TrackIdentityCandidate,
    /// Identifier this provider already knows the track by
    pub known_id: Option<&'a str>,
}

/// External metadata source
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name, also the breaker key
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind {
        ProviderKind::Catalog
    }

    /// Look a track up
    ///
    /// # Returns
    /// - `Ok(Some(response))` with at least one candidate
    /// - `Ok(None)` when the provider has nothing for this track
    /// - `Err(_)` on transport, status or parse failure
    async fn lookup(&self, query: LookupQuery<'_>)
        -> Result<Option<ProviderResponse>, ProviderError>;
}

/// What happened when one provider was consulted
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    /// Provider answered with candidates
    Found(ProviderResponse),
    /// Provider answered with nothing
    NoMatch,
    /// Provider call failed or timed out
    Failed(ProviderError),
    /// Breaker rejected the call without attempting it
    BreakerOpen { retry_in: Duration },
}

impl ProviderOutcome {
    /// Failed or rejected: the provider could not be asked
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ProviderOutcome::Failed(_) | ProviderOutcome::BreakerOpen { .. })
    }
}

/// Per-provider line in a resolution trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub result: AttemptResult,
}

/// Summary of one provider consultation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    /// Fields accepted from this provider
    Accepted { fields: Vec<String> },
    /// Candidates existed but none cleared the matcher or the field minimums
    BelowThreshold { best: Option<f64> },
    NoMatch,
    Failed { error: String },
    BreakerOpen,
}

impl std::fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.result {
            AttemptResult::Accepted { fields } => {
                write!(f, "{}: accepted {}", self.provider, fields.join(","))
            }
            AttemptResult::BelowThreshold { best: Some(best) } => {
                write!(f, "{}: below threshold (best {:.2})", self.provider, best)
            }
            AttemptResult::BelowThreshold { best: None } => {
                write!(f, "{}: all candidates rejected", self.provider)
            }
            AttemptResult::NoMatch => write!(f, "{}: no match", self.provider),
            AttemptResult::Failed { error } => write!(f, "{}: {}", self.provider, error),
            AttemptResult::BreakerOpen => write!(f, "{}: circuit open", self.provider),
        }
    }
}
