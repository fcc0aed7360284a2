//! Keyed registry of per-provider circuit breakers
//!
//! The map lock is only held to look up or insert a breaker; each breaker then
//! carries its own lock, so outcomes for unrelated providers never serialize.

use super::circuit_breaker::{BreakerConfig, BreakerOverride, BreakerStats, CircuitBreaker};
use cratedig_common::events::EventBus;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Breakers for every provider the orchestrator talks to
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerOverride>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    events: Option<EventBus>,
}

impl BreakerRegistry {
    /// Create a registry where every provider uses `defaults`
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Per-provider settings layered on the defaults
    pub fn with_overrides(mut self, overrides: HashMap<String, BreakerOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Publish transitions of every breaker created from now on
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Configuration a provider's breaker is (or will be) created with
    pub fn config_for(&self, provider: &str) -> BreakerConfig {
        match self.overrides.get(provider) {
            Some(overrides) => overrides.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }

    /// Get or create the breaker for `provider`
    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        {
            let map = self.breakers.read().unwrap_or_else(|p| p.into_inner());
            if let Some(existing) = map.get(provider) {
                return Arc::clone(existing);
            }
        }

        let mut map = self.breakers.write().unwrap_or_else(|p| p.into_inner());
        // Another worker may have inserted between the two locks
        let breaker = map.entry(provider.to_string()).or_insert_with(|| {
            let mut breaker = CircuitBreaker::new(provider, self.config_for(provider));
            if let Some(events) = &self.events {
                breaker = breaker.with_events(events.clone());
            }
            tracing::debug!(provider, "Created circuit breaker");
            Arc::new(breaker)
        });
        Arc::clone(breaker)
    }

    /// Names of providers with a breaker
    pub fn providers(&self) -> Vec<String> {
        let map = self.breakers.read().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    /// Statistics for every breaker, sorted by provider name
    pub fn stats(&self) -> Vec<BreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = {
            let map = self.breakers.read().unwrap_or_else(|p| p.into_inner());
            map.values().cloned().collect()
        };
        let mut stats: Vec<BreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.provider.cmp(&b.provider));
        stats
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cratedig_common::events::CircuitState;
    use std::time::Duration;

    #[test]
    fn test_same_breaker_returned_for_same_provider() {
        let registry = BreakerRegistry::default();
        let a = registry.get("beatport");
        let b = registry.get("beatport");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.providers(), vec!["beatport".to_string()]);
    }

    #[test]
    fn test_overrides_layer_on_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "discogs".to_string(),
            BreakerOverride {
                failure_threshold: Some(2),
                ..BreakerOverride::default()
            },
        );
        overrides.insert(
            "bandcamp".to_string(),
            BreakerOverride {
                call_timeout: Some(Duration::ZERO),
                ..BreakerOverride::default()
            },
        );
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 7,
            success_threshold: 3,
            open_duration: Duration::from_secs(300),
            call_timeout: Some(Duration::from_secs(10)),
        })
        .with_overrides(overrides);

        let discogs = registry.get("discogs").config().clone();
        assert_eq!(discogs.failure_threshold, 2);
        // Keys the override leaves unset come from the registry defaults
        assert_eq!(discogs.success_threshold, 3);
        assert_eq!(discogs.open_duration, Duration::from_secs(300));
        assert_eq!(discogs.call_timeout, Some(Duration::from_secs(10)));

        assert_eq!(registry.config_for("bandcamp").call_timeout, None);
        assert_eq!(registry.config_for("bandcamp").failure_threshold, 7);
        assert_eq!(registry.get("musicbrainz").config().failure_threshold, 7);
    }

    #[test]
    fn test_providers_are_isolated() {
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        registry.get("spotify").record_failure();

        assert_eq!(registry.get("spotify").state(), CircuitState::Open);
        assert_eq!(registry.get("deezer").state(), CircuitState::Closed);

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].provider, "deezer");
        assert_eq!(stats[1].state, CircuitState::Open);
        assert_eq!(stats[1].total_failures, 1);
    }
}
