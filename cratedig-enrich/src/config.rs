//! Service configuration (`config.toml`)
//!
//! Every section is optional; missing keys take the documented defaults.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [database]
//! path = "/var/lib/cratedig/cratedig.db"
//!
//! [breaker]
//! failure_threshold = 5
//! open_duration_secs = 60
//!
//! [breaker.providers.musicbrainz]
//! failure_threshold = 3
//!
//! [cooldown]
//! strategy = "adaptive"
//! max_attempts = 5
//!
//! [matcher]
//! fuzzy_threshold = 85.0
//!
//! [scoring.field_minimums]
//! artist = 0.75
//!
//! [cooccurrence]
//! min_probability = 0.70
//! ```

use crate::cooccurrence::CooccurrenceConfig;
use crate::cooldown::CooldownConfig;
use crate::normalize::DEFAULT_FUZZY_THRESHOLD;
use crate::resilience::{BreakerConfig, BreakerOverride, BreakerRegistry};
use crate::scoring::ScoringConfig;
use cratedig_common::config::{
    default_database_path, load_toml, resolve_config_path, write_toml, LoggingConfig,
};
use cratedig_common::events::EventBus;
use cratedig_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `[database]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

/// `[breaker]`: defaults plus per-provider overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    #[serde(flatten)]
    pub defaults: BreakerConfig,
    /// Overrides keyed by provider name; unset keys take the values above
    pub providers: HashMap<String, BreakerOverride>,
}

/// `[matcher]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Fuzzy acceptance threshold, 0-100
    pub fuzzy_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

/// `[musicbrainz]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicBrainzConfig {
    pub enabled: bool,
    /// Contact string sent with every request
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: format!("cratedig/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

impl MusicBrainzConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete enrichment service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub breaker: BreakerSection,
    pub cooldown: CooldownConfig,
    pub matcher: MatcherConfig,
    pub scoring: ScoringConfig,
    pub cooccurrence: CooccurrenceConfig,
    pub musicbrainz: MusicBrainzConfig,
}

impl EnrichConfig {
    /// Resolve and load the configuration
    ///
    /// Priority: CLI argument → `CRATEDIG_CONFIG` → platform config dir → defaults.
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_arg);
        let config: Self = load_toml(path.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_toml(self, path)
    }

    /// Reject values that would make a component misbehave
    pub fn validate(&self) -> Result<()> {
        let threshold = self.matcher.fuzzy_threshold;
        if !(0.0..100.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "matcher.fuzzy_threshold must be in [0, 100), got {}",
                threshold
            )));
        }
        if self.cooldown.max_attempts == 0 {
            return Err(Error::Config("cooldown.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.cooldown.jitter) {
            return Err(Error::Config(format!(
                "cooldown.jitter must be in [0, 1], got {}",
                self.cooldown.jitter
            )));
        }
        if !(0.0..=1.0).contains(&self.cooccurrence.min_probability) {
            return Err(Error::Config(format!(
                "cooccurrence.min_probability must be in [0, 1], got {}",
                self.cooccurrence.min_probability
            )));
        }
        let layered = self
            .breaker
            .providers
            .iter()
            .map(|(name, overrides)| (name.as_str(), overrides.apply(&self.breaker.defaults)));
        for (name, breaker) in std::iter::once(("default", self.breaker.defaults.clone())).chain(layered) {
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                return Err(Error::Config(format!(
                    "breaker thresholds for {} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Database file, TOML value first, else the platform default
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Breaker registry built from `[breaker]`
    pub fn breaker_registry(&self, events: Option<EventBus>) -> BreakerRegistry {
        let registry = BreakerRegistry::new(self.breaker.defaults.clone())
            .with_overrides(self.breaker.providers.clone());
        match events {
            Some(events) => registry.with_events(events),
            None => registry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::CooldownStrategy;
    use cratedig_common::config::CONFIG_ENV_VAR;
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[database]
path = "/tmp/cratedig-test.db"

[breaker]
failure_threshold = 4
open_duration_secs = 120

[breaker.providers.musicbrainz]
failure_threshold = 2

[cooldown]
strategy = "exponential"
max_attempts = 3

[matcher]
fuzzy_threshold = 90.0

[scoring]
review_threshold = 0.65

[cooccurrence]
min_contexts = 3
"#;

    #[test]
    fn test_defaults() {
        let config = EnrichConfig::default();
        assert_eq!(config.breaker.defaults.failure_threshold, 5);
        assert_eq!(config.cooldown.max_attempts, 5);
        assert_eq!(config.matcher.fuzzy_threshold, 85.0);
        assert_eq!(config.cooccurrence.min_probability, 0.70);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_document() {
        let config: EnrichConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/cratedig-test.db"));
        assert_eq!(config.breaker.defaults.failure_threshold, 4);
        assert_eq!(config.breaker.defaults.open_duration, Duration::from_secs(120));
        assert_eq!(config.breaker.providers["musicbrainz"].failure_threshold, Some(2));
        assert_eq!(config.breaker.providers["musicbrainz"].open_duration, None);
        assert_eq!(config.cooldown.strategy, CooldownStrategy::Exponential);
        assert_eq!(config.cooldown.max_attempts, 3);
        assert_eq!(config.scoring.review_threshold, 0.65);
        assert_eq!(config.cooccurrence.min_contexts, 3);
        // Untouched keys keep defaults
        assert_eq!(config.cooccurrence.min_probability, 0.70);
        assert_eq!(config.cooldown.jitter, 0.10);
    }

    #[test]
    fn test_registry_applies_overrides() {
        let config: EnrichConfig = toml::from_str(SAMPLE).unwrap();
        let registry = config.breaker_registry(None);
        assert_eq!(registry.config_for("musicbrainz").failure_threshold, 2);
        assert_eq!(registry.config_for("discogs").failure_threshold, 4);
        // A partial override keeps the section's other values
        assert_eq!(
            registry.config_for("musicbrainz").open_duration,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = EnrichConfig::default();
        config.matcher.fuzzy_threshold = 120.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cratedig").join("config.toml");

        let mut config: EnrichConfig = toml::from_str(SAMPLE).unwrap();
        config.breaker.providers.insert(
            "discogs".to_string(),
            BreakerOverride {
                call_timeout: Some(Duration::ZERO),
                ..BreakerOverride::default()
            },
        );
        config.save(&path).unwrap();

        let loaded = EnrichConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.breaker_registry(None).config_for("discogs").call_timeout, None);
    }

    #[test]
    fn test_zero_override_threshold_rejected() {
        let mut config = EnrichConfig::default();
        config.breaker.providers.insert(
            "discogs".to_string(),
            BreakerOverride {
                success_threshold: Some(0),
                ..BreakerOverride::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("discogs"), "{}", err);
    }

    #[test]
    #[serial]
    fn test_load_from_env_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &path);
        let loaded = EnrichConfig::load(None);
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(loaded.unwrap().matcher.fuzzy_threshold, 90.0);
    }
}
