//! Waterfall enrichment orchestrator
//!
//! Per request:
//! 1. Normalize the title and extract hints
//! 2. Ask each provider in priority order through its circuit breaker
//! 3. Rank and score every non-empty answer; accept fields clearing their minimum
//! 4. With enough DJ-set sightings, fall back to co-occurrence analysis
//! 5. Hand anything still unresolved to the cooldown queue
//!
//! Holds no per-track state beyond the in-flight request. One track's failure
//! never affects other tracks in the same batch.

pub mod provider;

pub use provider::{
    AttemptResult, LookupQuery, Provider, ProviderAttempt, ProviderKind, ProviderOutcome,
    ProviderResponse,
};

use crate::cooccurrence::features::same_artist;
use crate::cooccurrence::{CooccurrenceAnalyzer, CooccurrenceResult};
use crate::cooldown::{CooldownQueue, CooldownStatus, FailureReason, RetryHints, ScheduleOutcome};
use crate::db::ScoreRepository;
use crate::error::{CooldownError, ProviderError};
use crate::normalize::vocabulary::labels_match;
use crate::normalize::{identity_for, CandidateMatcher, RankedCandidate, DEFAULT_FUZZY_THRESHOLD};
use crate::resilience::{BreakerError, BreakerRegistry};
use crate::scoring::{ConfidenceScore, ConfidenceScorer, ScoringConfig};
use crate::types::{
    DjSetContext, EnrichField, IdentificationRequest, MatchCandidate, TrackIdentityCandidate,
};
use chrono::{DateTime, Utc};
use cratedig_common::events::{EnrichEvent, EventBus};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source tag for attributions made by co-occurrence analysis
pub const COOCCURRENCE_SOURCE: &str = "cooccurrence";

/// Extra time the blocking analysis gets beyond the fit budget
const ANALYSIS_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Results
// ============================================================================

/// One accepted field value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldAttribution {
    pub field: EnrichField,
    pub value: String,
    pub score: ConfidenceScore,
    /// Accepted but below the review threshold
    pub needs_review: bool,
}

/// Terminal state of one enrichment request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Every requested field was attributed
    Resolved,
    /// Some fields were attributed; the rest wait in the cooldown queue
    Partial { retry_after: DateTime<Utc> },
    /// Nothing was attributed; the track waits in the cooldown queue
    CoolingDown { retry_after: DateTime<Utc> },
    /// Retry budget exhausted; requires a manual reopen
    PermanentlyFailed { attempts: u32 },
}

impl EnrichmentStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, EnrichmentStatus::Resolved)
    }
}

/// Outcome of `Orchestrator::enrich`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentResult {
    pub track_id: String,
    pub identity: TrackIdentityCandidate,
    pub attributions: Vec<FieldAttribution>,
    pub unresolved: Vec<EnrichField>,
    /// Providers consulted, in order
    pub attempts: Vec<ProviderAttempt>,
    pub cooccurrence: Option<CooccurrenceResult>,
    pub status: EnrichmentStatus,
}

impl EnrichmentResult {
    pub fn attribution(&self, field: EnrichField) -> Option<&FieldAttribution> {
        self.attributions.iter().find(|a| a.field == field)
    }
}

/// Working state of one in-flight request
struct Resolution {
    attributions: Vec<FieldAttribution>,
    unresolved: Vec<EnrichField>,
    attempts: Vec<ProviderAttempt>,
    saw_low_confidence: bool,
    saw_unavailable: bool,
}

impl Resolution {
    fn new(fields: Vec<EnrichField>) -> Self {
        Self {
            attributions: Vec::new(),
            unresolved: fields,
            attempts: Vec::new(),
            saw_low_confidence: false,
            saw_unavailable: false,
        }
    }

    fn failure_reason(&self) -> FailureReason {
        if self.saw_low_confidence {
            FailureReason::LowConfidence
        } else if self.saw_unavailable {
            FailureReason::ProviderUnavailable
        } else {
            FailureReason::NoMatch
        }
    }

    fn failure_message(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers configured".to_string();
        }
        self.attempts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Couples providers, breakers, matcher, scorer, analyzer and cooldown queue
pub struct Orchestrator {
    providers: Vec<Arc<dyn Provider>>,
    breakers: Arc<BreakerRegistry>,
    queue: Arc<CooldownQueue>,
    matcher: CandidateMatcher,
    scorer: ConfidenceScorer,
    scoring: ScoringConfig,
    analyzer: CooccurrenceAnalyzer,
    scores: Option<ScoreRepository>,
    events: Option<EventBus>,
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// # Arguments
    /// * `providers` - Providers in priority order
    /// * `breakers` - Shared breaker registry (one breaker per provider name)
    /// * `queue` - Cooldown queue for unresolved tracks
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        breakers: Arc<BreakerRegistry>,
        queue: Arc<CooldownQueue>,
    ) -> Self {
        Self {
            providers,
            breakers,
            queue,
            matcher: CandidateMatcher::new(DEFAULT_FUZZY_THRESHOLD),
            scorer: ConfidenceScorer::with_fuzzy_threshold(DEFAULT_FUZZY_THRESHOLD),
            scoring: ScoringConfig::default(),
            analyzer: CooccurrenceAnalyzer::default(),
            scores: None,
            events: None,
        }
    }

    /// Fuzzy acceptance threshold for both ranking and the fuzzy tier
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.matcher = CandidateMatcher::new(threshold);
        self.scorer = ConfidenceScorer::with_fuzzy_threshold(threshold);
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_analyzer(mut self, analyzer: CooccurrenceAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Persist an audit row for every accepted field
    pub fn with_score_repository(mut self, scores: ScoreRepository) -> Self {
        self.scores = Some(scores);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn queue(&self) -> &Arc<CooldownQueue> {
        &self.queue
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Enrich one track
    ///
    /// # Errors
    /// Only cooldown store failures. Provider failures, empty answers, open
    /// breakers and rejected matches are routine and end up in the result.
    pub async fn enrich(
        &self,
        request: &IdentificationRequest,
    ) -> Result<EnrichmentResult, CooldownError> {
        let (parsed, identity) = identity_for(request);
        debug!(
            track_id = %request.track_id,
            search_key = %identity.search_key,
            label_hint = ?identity.label_hint,
            remix = ?parsed.remix_type,
            "Normalized title"
        );

        let existing = self.queue.get(&request.track_id).await?;
        if let Some(entry) = existing.as_ref() {
            if entry.status == CooldownStatus::PermanentlyFailed {
                debug!(track_id = %request.track_id, "Track permanently failed, skipping");
                return Ok(EnrichmentResult {
                    track_id: request.track_id.clone(),
                    identity,
                    attributions: Vec::new(),
                    unresolved: request.requested_fields(),
                    attempts: Vec::new(),
                    cooccurrence: None,
                    status: EnrichmentStatus::PermanentlyFailed {
                        attempts: entry.attempt,
                    },
                });
            }
        }

        let mut resolution = Resolution::new(request.requested_fields());

        for provider in &self.providers {
            if resolution.unresolved.is_empty() {
                break;
            }
            self.try_provider(provider.as_ref(), request, &identity, &mut resolution)
                .await;
        }

        let mut cooccurrence = None;
        if !resolution.unresolved.is_empty()
            && request.contexts.len() >= self.analyzer.config().min_contexts
        {
            if let Some(result) = self.run_cooccurrence(&request.contexts).await {
                self.accept_cooccurrence(&result, &mut resolution);
                cooccurrence = Some(result);
            }
        }

        for attribution in &resolution.attributions {
            self.record_attribution(&request.track_id, attribution).await;
        }

        let status = if resolution.unresolved.is_empty() {
            if existing.is_some() {
                self.queue.complete(&request.track_id).await?;
            }
            info!(
                track_id = %request.track_id,
                fields = resolution.attributions.len(),
                "Track resolved"
            );
            EnrichmentStatus::Resolved
        } else {
            // The queue entry is authoritative once it exists (reopen resets it)
            let attempt = existing.as_ref().map_or(request.attempt, |e| e.attempt) + 1;
            let hints = RetryHints {
                label_hint: identity.label_hint.clone(),
                year: request.year,
            };
            let outcome = self
                .queue
                .schedule(
                    &request.track_id,
                    resolution.failure_reason(),
                    &resolution.failure_message(),
                    attempt,
                    hints,
                )
                .await?;
            match outcome {
                ScheduleOutcome::PermanentlyFailed { attempts } => {
                    EnrichmentStatus::PermanentlyFailed { attempts }
                }
                ScheduleOutcome::Scheduled { retry_after, .. } if resolution.attributions.is_empty() => {
                    EnrichmentStatus::CoolingDown { retry_after }
                }
                ScheduleOutcome::Scheduled { retry_after, .. } => {
                    EnrichmentStatus::Partial { retry_after }
                }
            }
        };

        Ok(EnrichmentResult {
            track_id: request.track_id.clone(),
            identity,
            attributions: resolution.attributions,
            unresolved: resolution.unresolved,
            attempts: resolution.attempts,
            cooccurrence,
            status,
        })
    }

    /// Enrich many tracks with bounded concurrency
    ///
    /// Results arrive in completion order, keyed by track id.
    pub async fn enrich_batch(
        &self,
        requests: Vec<IdentificationRequest>,
        concurrency: usize,
    ) -> Vec<(String, Result<EnrichmentResult, CooldownError>)> {
        stream::iter(requests)
            .map(|request| async move {
                let result = self.enrich(&request).await;
                if let Err(e) = &result {
                    warn!(track_id = %request.track_id, error = %e, "Enrichment failed");
                }
                (request.track_id, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Call one provider through its breaker
    pub async fn consult(&self, provider: &dyn Provider, query: LookupQuery<'_>) -> ProviderOutcome {
        let name = provider.name();
        let breaker = self.breakers.get(name);
        let timeout = self.breakers.config_for(name).call_timeout;

        match breaker
            .call_with_timeout(timeout, || provider.lookup(query))
            .await
        {
            Ok(Some(response)) if !response.candidates.is_empty() => {
                ProviderOutcome::Found(response)
            }
            Ok(_) => ProviderOutcome::NoMatch,
            Err(BreakerError::Open { retry_in, .. }) => ProviderOutcome::BreakerOpen { retry_in },
            Err(BreakerError::Timeout { after, .. }) => {
                ProviderOutcome::Failed(ProviderError::Timeout(after))
            }
            Err(BreakerError::Inner(e)) => {
                warn!(provider = name, error = %e, "Provider call failed");
                ProviderOutcome::Failed(e)
            }
        }
    }

    async fn try_provider(
        &self,
        provider: &dyn Provider,
        request: &IdentificationRequest,
        identity: &TrackIdentityCandidate,
        resolution: &mut Resolution,
    ) {
        let name = provider.name().to_string();
        let query = LookupQuery {
            identity,
            known_id: request.known_id_for(&name),
        };

        let outcome = self.consult(provider, query).await;
        if outcome.is_unavailable() {
            resolution.saw_unavailable = true;
        }

        let result = match outcome {
            ProviderOutcome::Found(response) => {
                self.accept_response(provider, identity, &request.contexts, response, resolution)
            }
            ProviderOutcome::NoMatch => {
                debug!(provider = %name, track_id = %request.track_id, "No match");
                AttemptResult::NoMatch
            }
            ProviderOutcome::Failed(e) => AttemptResult::Failed {
                error: e.to_string(),
            },
            ProviderOutcome::BreakerOpen { retry_in } => {
                debug!(provider = %name, ?retry_in, "Skipping provider, circuit open");
                AttemptResult::BreakerOpen
            }
        };

        resolution.attempts.push(ProviderAttempt {
            provider: name,
            result,
        });
    }

    /// Rank, score and accept fields from one provider's answer
    fn accept_response(
        &self,
        provider: &dyn Provider,
        identity: &TrackIdentityCandidate,
        contexts: &[DjSetContext],
        response: ProviderResponse,
        resolution: &mut Resolution,
    ) -> AttemptResult {
        let name = provider.name();

        // Identifier matches skip title ranking
        let (by_identifier, searched): (Vec<_>, Vec<_>) = response
            .candidates
            .into_iter()
            .partition(|c| c.identifier_match.is_some());

        let mut scored: Vec<(MatchCandidate, ConfidenceScore)> = by_identifier
            .into_iter()
            .filter_map(|c| {
                let matched = c.identifier_match?;
                let score = self.scorer.score_exact(name, matched);
                Some((c, score))
            })
            .collect();

        for ranked in self.matcher.rank(identity, &searched) {
            let score = self.score_ranked(provider.kind(), name, &ranked);
            if score.is_rejected() {
                warn!(
                    provider = name,
                    candidate = %ranked.candidate.title,
                    fuzzy = ranked.title_score,
                    "Below-threshold match rejected"
                );
                continue;
            }
            let score = boost_with_context(score, &ranked.candidate, contexts);
            scored.push((ranked.candidate, score));
        }

        if scored.is_empty() {
            resolution.saw_low_confidence = true;
            return AttemptResult::BelowThreshold { best: None };
        }

        let mut best = 0.0_f64;
        for (candidate, score) in &scored {
            best = best.max(score.final_value);
            let accepted = self.accept_fields(candidate, score, resolution);
            if !accepted.is_empty() {
                info!(
                    provider = name,
                    candidate = %candidate.title,
                    method = %score.method.as_str(),
                    confidence = score.final_value,
                    fields = ?accepted,
                    "Accepted provider match"
                );
                return AttemptResult::Accepted {
                    fields: accepted.iter().map(|f| f.as_str().to_string()).collect(),
                };
            }
        }

        warn!(provider = name, best, "No candidate cleared the field minimums");
        resolution.saw_low_confidence = true;
        AttemptResult::BelowThreshold { best: Some(best) }
    }

    fn score_ranked(&self, kind: ProviderKind, provider: &str, ranked: &RankedCandidate) -> ConfidenceScore {
        let candidate = &ranked.candidate;
        match kind {
            ProviderKind::Community => self.scorer.score_community(
                provider,
                candidate.verification_link.is_some(),
                candidate.popularity,
            ),
            ProviderKind::Catalog if !ranked.factors.agreements.is_empty() => {
                self.scorer.score_disambiguated(provider, &ranked.factors)
            }
            ProviderKind::Catalog => self.scorer.score_fuzzy(provider, ranked.title_score),
        }
    }

    /// Resolve every open field the candidate provides at sufficient confidence
    fn accept_fields(
        &self,
        candidate: &MatchCandidate,
        score: &ConfidenceScore,
        resolution: &mut Resolution,
    ) -> Vec<EnrichField> {
        let mut accepted = Vec::new();
        for field in resolution.unresolved.clone() {
            let Some(value) = candidate.value_for(field) else {
                continue;
            };
            if score.final_value < self.scoring.minimum_for(field) {
                debug!(
                    field = field.as_str(),
                    confidence = score.final_value,
                    minimum = self.scoring.minimum_for(field),
                    "Field below minimum"
                );
                continue;
            }
            self.resolve(field, value, score.clone(), resolution);
            accepted.push(field);
        }
        accepted
    }

    fn resolve(
        &self,
        field: EnrichField,
        value: String,
        score: ConfidenceScore,
        resolution: &mut Resolution,
    ) {
        resolution.unresolved.retain(|f| *f != field);
        let needs_review = self.scoring.needs_review(&score);
        resolution.attributions.push(FieldAttribution {
            field,
            value,
            score,
            needs_review,
        });
    }

    async fn run_cooccurrence(&self, contexts: &[DjSetContext]) -> Option<CooccurrenceResult> {
        let analyzer = self.analyzer.clone();
        let contexts = contexts.to_vec();
        let limit = analyzer.config().fit_timeout() + ANALYSIS_GRACE;

        let task = tokio::task::spawn_blocking(move || analyzer.analyze(&contexts));
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                warn!(error = %e, "Co-occurrence analysis aborted");
                None
            }
            Err(_) => {
                warn!(?limit, "Co-occurrence analysis timed out");
                None
            }
        }
    }

    /// Score the analyzer's top candidate as a statistical-model attribution
    fn accept_cooccurrence(&self, result: &CooccurrenceResult, resolution: &mut Resolution) {
        let Some(top) = result.top() else {
            return;
        };

        if resolution.unresolved.contains(&EnrichField::Artist) {
            let score = self.scorer.score_model(COOCCURRENCE_SOURCE, top.probability);
            if score.final_value >= self.scoring.minimum_for(EnrichField::Artist) {
                info!(
                    candidate = %top.candidate,
                    probability = top.probability,
                    occurrences = top.occurrences,
                    "Artist attributed from co-occurrence"
                );
                self.resolve(EnrichField::Artist, top.candidate.clone(), score, resolution);
            } else {
                resolution.saw_low_confidence = true;
            }
        }

        if resolution.unresolved.contains(&EnrichField::Label) {
            if let Some(label) = top.supporting_label.as_ref() {
                let score = self
                    .scorer
                    .score_contextual(COOCCURRENCE_SOURCE, top.context_strength);
                if score.final_value >= self.scoring.minimum_for(EnrichField::Label) {
                    self.resolve(EnrichField::Label, label.clone(), score, resolution);
                } else {
                    debug!(
                        label = %label,
                        confidence = score.final_value,
                        "Contextual label below minimum"
                    );
                }
            }
        }
    }

    async fn record_attribution(&self, track_id: &str, attribution: &FieldAttribution) {
        if let Some(scores) = &self.scores {
            if let Err(e) = scores
                .record(track_id, attribution.field, &attribution.value, &attribution.score)
                .await
            {
                warn!(track_id, field = attribution.field.as_str(), error = %e, "Failed to persist confidence score");
            }
        }

        if let Some(events) = &self.events {
            events.emit_lossy(EnrichEvent::FieldResolved {
                track_id: track_id.to_string(),
                field: attribution.field.as_str().to_string(),
                method: attribution.score.method.as_str().to_string(),
                confidence: attribution.score.final_value,
                timestamp: Utc::now(),
            });
        }
    }
}

// ============================================================================
// Contextual evidence
// ============================================================================

/// DJ affinity and set coherence of a candidate across DJ-set sightings
///
/// - affinity: share of sets whose DJ is the candidate artist or owns its label
/// - coherence: share of sets where a neighboring track shares its label
///
/// `None` without contexts or without a candidate label.
pub fn context_signals(
    candidate: &MatchCandidate,
    contexts: &[DjSetContext],
) -> Option<(f64, f64)> {
    let label = candidate.label.as_deref()?;
    if contexts.is_empty() {
        return None;
    }

    let total = contexts.len() as f64;
    let affine = contexts
        .iter()
        .filter(|ctx| {
            candidate.artists.iter().any(|a| same_artist(&ctx.dj.name, a))
                || ctx.dj.owned_labels.iter().any(|owned| labels_match(owned, label))
        })
        .count();
    let coherent = contexts
        .iter()
        .filter(|ctx| {
            ctx.predecessor()
                .into_iter()
                .chain(ctx.successor())
                .filter_map(|t| t.label.as_deref())
                .any(|l| labels_match(l, label))
        })
        .count();

    Some((affine as f64 / total, coherent as f64 / total))
}

fn boost_with_context(
    score: ConfidenceScore,
    candidate: &MatchCandidate,
    contexts: &[DjSetContext],
) -> ConfidenceScore {
    match context_signals(candidate, contexts) {
        Some((affinity, coherence)) => score.with_contextual_boost(affinity, coherence),
        None => score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::{CooldownConfig, InMemoryCooldownStore};
    use crate::providers::StaticProvider;
    use crate::resilience::BreakerConfig;
    use crate::scoring::AttributionMethod;
    use crate::types::{ContextTrack, DjInfo};
    use cratedig_common::events::CircuitState;

    fn orchestrator(providers: Vec<Arc<dyn Provider>>) -> Orchestrator {
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: 2,
            ..BreakerConfig::default()
        }));
        let queue = Arc::new(CooldownQueue::new(
            Arc::new(InMemoryCooldownStore::new()),
            CooldownConfig::default(),
        ));
        Orchestrator::new(providers, breakers, queue)
    }

    fn levels(provider: &str) -> MatchCandidate {
        MatchCandidate {
            title: "Levels".to_string(),
            artists: vec!["Avicii".to_string()],
            label: Some("LEVELS".to_string()),
            year: Some(2011),
            duration_secs: Some(202),
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_confident_provider_wins() {
        let failing = Arc::new(StaticProvider::new("down").failing(ProviderError::Network("refused".into())));
        let empty = Arc::new(StaticProvider::new("empty"));
        let catalog = Arc::new(StaticProvider::new("catalog").with_track("Levels", vec![levels("catalog")]));
        let never = Arc::new(StaticProvider::new("never").with_track("Levels", vec![levels("never")]));

        let orch = orchestrator(vec![failing.clone(), empty.clone(), catalog.clone(), never.clone()]);
        let mut request = IdentificationRequest::new("t1", "Levels (Original Mix)")
            .with_fields(vec![EnrichField::Artist, EnrichField::Year]);
        request.year = Some(2011);

        let result = orch.enrich(&request).await.unwrap();

        assert_eq!(result.status, EnrichmentStatus::Resolved);
        let artist = result.attribution(EnrichField::Artist).unwrap();
        assert_eq!(artist.value, "Avicii");
        assert_eq!(artist.score.method, AttributionMethod::Disambiguated);
        assert_eq!(artist.score.source, "catalog");
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(never.calls(), 0);
        assert_eq!(failing.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_waterfall_schedules_cooldown() {
        let failing = Arc::new(StaticProvider::new("down").failing(ProviderError::RateLimited));
        let orch = orchestrator(vec![failing]);
        let request = IdentificationRequest::new("t2", "Unknown Dubplate");

        let result = orch.enrich(&request).await.unwrap();
        assert!(matches!(result.status, EnrichmentStatus::CoolingDown { .. }));

        let entry = orch.queue().get("t2").await.unwrap().unwrap();
        assert_eq!(entry.reason, FailureReason::ProviderUnavailable);
        assert_eq!(entry.attempt, 1);
        assert!(entry.message.contains("down"));
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider() {
        let failing = Arc::new(StaticProvider::new("flaky").failing(ProviderError::Api {
            status: 503,
            message: "unavailable".into(),
        }));
        let orch = orchestrator(vec![failing.clone()]);

        for i in 0..3 {
            let request = IdentificationRequest::new(format!("t{i}"), "Some Track");
            orch.enrich(&request).await.unwrap();
        }

        // Threshold 2: third request is rejected without a call
        assert_eq!(failing.calls(), 2);
        assert_eq!(orch.breakers().get("flaky").state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_rejected_match_is_low_confidence() {
        let catalog = Arc::new(StaticProvider::new("catalog").with_track(
            "Control",
            vec![MatchCandidate {
                title: "Control".into(),
                artists: vec!["Matrix".into()],
                label: Some("Hospital Records".into()),
                provider: "catalog".into(),
                ..Default::default()
            }],
        ));
        let orch = orchestrator(vec![catalog]);
        let request = IdentificationRequest::new("t3", "Control [Viper]").with_artist("ID");

        let result = orch.enrich(&request).await.unwrap();
        assert!(result.attributions.is_empty());
        let entry = orch.queue().get("t3").await.unwrap().unwrap();
        assert_eq!(entry.reason, FailureReason::LowConfidence);
    }

    #[tokio::test]
    async fn test_cooccurrence_resolves_artist() {
        let sighting = |set_id: &str, dj: &str| DjSetContext {
            set_id: set_id.to_string(),
            dj: DjInfo {
                name: dj.to_string(),
                owned_labels: Vec::new(),
            },
            position: 3,
            set_length: 12,
            preceding: vec![ContextTrack::new("Phace", "Plastic Acid", Some("Neosignal"))],
            following: vec![ContextTrack::new("ID", "ID", None)],
        };
        let orch = orchestrator(vec![Arc::new(StaticProvider::new("empty"))]);
        let request = IdentificationRequest::new("t4", "ID")
            .with_artist("ID")
            .with_fields(vec![EnrichField::Artist])
            .with_contexts(vec![
                sighting("s1", "Noisia"),
                sighting("s2", "Andy C"),
                sighting("s3", "Friction"),
            ]);

        let result = orch.enrich(&request).await.unwrap();
        assert_eq!(result.status, EnrichmentStatus::Resolved);
        let artist = result.attribution(EnrichField::Artist).unwrap();
        assert_eq!(artist.value, "Phace");
        assert_eq!(artist.score.method, AttributionMethod::StatisticalModel);
        assert!(artist.score.final_value >= 0.70);
    }

    #[tokio::test]
    async fn test_permanently_failed_track_is_not_retried() {
        let empty = Arc::new(StaticProvider::new("empty"));
        let orch = orchestrator(vec![empty.clone()]);
        let mut request = IdentificationRequest::new("t5", "Nothing Anywhere");
        request.attempt = 4;

        let first = orch.enrich(&request).await.unwrap();
        assert_eq!(first.status, EnrichmentStatus::PermanentlyFailed { attempts: 5 });

        let second = orch.enrich(&request).await.unwrap();
        assert!(matches!(second.status, EnrichmentStatus::PermanentlyFailed { .. }));
        assert_eq!(empty.calls(), 1);
    }

    #[tokio::test]
    async fn test_reopened_track_counts_from_queue_entry() {
        let empty = Arc::new(StaticProvider::new("empty"));
        let orch = orchestrator(vec![empty]);
        let mut request = IdentificationRequest::new("t6", "Nothing Anywhere");
        request.attempt = 4;

        let first = orch.enrich(&request).await.unwrap();
        assert_eq!(first.status, EnrichmentStatus::PermanentlyFailed { attempts: 5 });
        assert!(orch.queue().reopen("t6").await.unwrap());

        // The caller still carries attempt = 4
        let retried = orch.enrich(&request).await.unwrap();
        assert!(matches!(retried.status, EnrichmentStatus::CoolingDown { .. }));
        let entry = orch.queue().get("t6").await.unwrap().unwrap();
        assert_eq!(entry.attempt, 1);
        assert_eq!(entry.status, CooldownStatus::Waiting);
    }

    #[test]
    fn test_context_signals() {
        let candidate = levels("x");
        let contexts = vec![DjSetContext {
            set_id: "s".into(),
            dj: DjInfo {
                name: "Avicii".into(),
                owned_labels: Vec::new(),
            },
            position: 0,
            set_length: 2,
            preceding: Vec::new(),
            following: vec![ContextTrack::new("Other", "Song", Some("Levels"))],
        }];
        assert_eq!(context_signals(&candidate, &contexts), Some((1.0, 1.0)));
        assert_eq!(context_signals(&candidate, &[]), None);
    }
}
