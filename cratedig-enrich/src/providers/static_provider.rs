//! In-memory provider for tests and offline runs
//!
//! Answers from a fixed table keyed by the parsed, normalized title. Can be
//! told to fail every call or to respond slowly.

use crate::error::ProviderError;
use crate::normalize::parse;
use crate::orchestrator::{LookupQuery, Provider, ProviderKind, ProviderResponse};
use crate::types::{IdentifierMatch, MatchCandidate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct StaticProvider {
    name: String,
    kind: ProviderKind,
    tracks: HashMap<String, Vec<MatchCandidate>>,
    failure: Option<ProviderError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Catalog,
            tracks: HashMap::new(),
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Answer lookups for `title` with `candidates`
    pub fn with_track(mut self, title: &str, candidates: Vec<MatchCandidate>) -> Self {
        let candidates = candidates
            .into_iter()
            .map(|mut c| {
                if c.provider.is_empty() {
                    c.provider = self.name.clone();
                }
                c
            })
            .collect();
        self.tracks.insert(parse(title).normalized, candidates);
        self
    }

    /// Fail every call with `error`
    pub fn failing(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Lookups received so far (including failed ones)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn by_identifier(&self, id: &str) -> Option<MatchCandidate> {
        self.tracks
            .values()
            .flatten()
            .find(|c| c.provider_id.as_deref() == Some(id))
            .map(|c| MatchCandidate {
                identifier_match: Some(IdentifierMatch::Full),
                ..c.clone()
            })
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn lookup(
        &self,
        query: LookupQuery<'_>,
    ) -> Result<Option<ProviderResponse>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        if let Some(found) = query.known_id.and_then(|id| self.by_identifier(id)) {
            return Ok(Some(ProviderResponse::new(vec![found])));
        }

        Ok(self
            .tracks
            .get(&query.identity.search_key)
            .filter(|candidates| !candidates.is_empty())
            .map(|candidates| ProviderResponse::new(candidates.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackIdentityCandidate;

    fn identity(key: &str) -> TrackIdentityCandidate {
        TrackIdentityCandidate {
            title: key.to_string(),
            search_key: key.to_string(),
            artist: None,
            duration_secs: None,
            year: None,
            label_hint: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_title_and_identifier() {
        let provider = StaticProvider::new("static").with_track(
            "Strobe (Club Edit)",
            vec![MatchCandidate {
                title: "Strobe".into(),
                provider_id: Some("rec-1".into()),
                ..Default::default()
            }],
        );

        let id = identity("strobe");
        let by_title = provider
            .lookup(LookupQuery { identity: &id, known_id: None })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_title.candidates[0].provider, "static");
        assert_eq!(by_title.candidates[0].identifier_match, None);

        let other = identity("unrelated");
        let by_id = provider
            .lookup(LookupQuery { identity: &other, known_id: Some("rec-1") })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.candidates[0].identifier_match, Some(IdentifierMatch::Full));

        let missing = provider
            .lookup(LookupQuery { identity: &other, known_id: None })
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(provider.calls(), 3);
    }
}
