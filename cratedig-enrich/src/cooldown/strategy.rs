//! Retry delay strategies
//!
//! Delays are computed in days and converted to `chrono::Duration` at the end.
//! Every strategy receives the same multiplicative jitter and the same floor
//! of one day.

use chrono::{Datelike, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: f64 = 86_400.0;

/// Shortest delay any strategy produces
pub const MIN_DELAY_DAYS: f64 = 1.0;

/// A release this many years old (or newer) counts as recent
const RECENT_YEARS: i32 = 2;

/// Multiplier applied to the adaptive base for each shortening signal
const ADAPTIVE_SHORTEN: f64 = 0.5;

/// How a retry delay grows across attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownStrategy {
    /// Constant delay
    Fixed,
    /// base x 2^(attempt-1), capped
    Exponential,
    /// Shortened by label/recency hints, multiplied per attempt, capped
    Adaptive,
}

impl CooldownStrategy {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownStrategy::Fixed => "fixed",
            CooldownStrategy::Exponential => "exponential",
            CooldownStrategy::Adaptive => "adaptive",
        }
    }

    /// Parse the string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(CooldownStrategy::Fixed),
            "exponential" => Some(CooldownStrategy::Exponential),
            "adaptive" => Some(CooldownStrategy::Adaptive),
            _ => None,
        }
    }
}

impl std::fmt::Display for CooldownStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooldown queue configuration (`[cooldown]` TOML section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Delay strategy
    pub strategy: CooldownStrategy,
    /// Attempt count at which a track is permanently failed
    pub max_attempts: u32,
    /// Fixed strategy delay
    pub fixed_days: f64,
    /// Exponential strategy first delay
    pub exponential_base_days: f64,
    /// Exponential strategy ceiling
    pub exponential_cap_days: f64,
    /// Adaptive strategy starting delay
    pub adaptive_base_days: f64,
    /// Adaptive strategy growth per attempt
    pub adaptive_growth: f64,
    /// Adaptive strategy ceiling
    pub adaptive_cap_days: f64,
    /// Relative jitter (0.10 = ±10%)
    pub jitter: f64,
    /// Seconds after which an unfinished claim may be taken by another worker
    pub claim_ttl_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            strategy: CooldownStrategy::Adaptive,
            max_attempts: 5,
            fixed_days: 7.0,
            exponential_base_days: 1.0,
            exponential_cap_days: 180.0,
            adaptive_base_days: 30.0,
            adaptive_growth: 1.5,
            adaptive_cap_days: 365.0,
            jitter: 0.10,
            claim_ttl_secs: 900,
        }
    }
}

impl CooldownConfig {
    /// Claim expiry as a chrono duration
    pub fn claim_ttl(&self) -> Duration {
        Duration::seconds(self.claim_ttl_secs.min(i64::MAX as u64) as i64)
    }
}

/// Evidence that changes how soon a retry is worthwhile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHints {
    /// Label extracted from the title; label catalogues get indexed quickly
    pub label_hint: Option<String>,
    /// Release year, if known
    pub year: Option<i32>,
}

impl RetryHints {
    /// True when the release is at most two years old
    pub fn is_recent(&self) -> bool {
        let current = Utc::now().year();
        self.year.is_some_and(|y| current - y <= RECENT_YEARS)
    }
}

/// Delay in days before jitter, clamped to the strategy's cap
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub fn base_delay_days(config: &CooldownConfig, attempt: u32, hints: &RetryHints) -> f64 {
    let exponent = attempt.saturating_sub(1).min(63) as i32;

    match config.strategy {
        CooldownStrategy::Fixed => config.fixed_days,
        CooldownStrategy::Exponential => {
            (config.exponential_base_days * 2f64.powi(exponent)).min(config.exponential_cap_days)
        }
        CooldownStrategy::Adaptive => {
            let mut base = config.adaptive_base_days;
            if hints.label_hint.is_some() {
                base *= ADAPTIVE_SHORTEN;
            }
            if hints.is_recent() {
                base *= ADAPTIVE_SHORTEN;
            }
            (base * config.adaptive_growth.powi(exponent)).min(config.adaptive_cap_days)
        }
    }
}

fn cap_days(config: &CooldownConfig) -> f64 {
    match config.strategy {
        CooldownStrategy::Fixed => f64::MAX,
        CooldownStrategy::Exponential => config.exponential_cap_days,
        CooldownStrategy::Adaptive => config.adaptive_cap_days,
    }
}

/// Delay with an explicit jitter factor (e.g. 0.95 for -5%)
///
/// The result never drops below one day and never exceeds the strategy cap.
pub fn delay_with_factor(
    config: &CooldownConfig,
    attempt: u32,
    hints: &RetryHints,
    factor: f64,
) -> Duration {
    let days = (base_delay_days(config, attempt, hints) * factor)
        .min(cap_days(config))
        .max(MIN_DELAY_DAYS);
    Duration::seconds((days * SECS_PER_DAY).round() as i64)
}

/// Delay with random jitter drawn from `[1 - jitter, 1 + jitter]`
pub fn compute_delay(config: &CooldownConfig, attempt: u32, hints: &RetryHints) -> Duration {
    let spread = config.jitter.clamp(0.0, 0.99);
    let factor = if spread > 0.0 {
        rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread))
    } else {
        1.0
    };
    delay_with_factor(config, attempt, hints, factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(d: Duration) -> f64 {
        d.num_seconds() as f64 / SECS_PER_DAY
    }

    fn config(strategy: CooldownStrategy) -> CooldownConfig {
        CooldownConfig {
            strategy,
            ..CooldownConfig::default()
        }
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let cfg = config(CooldownStrategy::Fixed);
        let hints = RetryHints::default();
        for attempt in 1..5 {
            assert_eq!(days(delay_with_factor(&cfg, attempt, &hints, 1.0)), 7.0);
        }
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let cfg = config(CooldownStrategy::Exponential);
        let hints = RetryHints::default();
        assert_eq!(base_delay_days(&cfg, 1, &hints), 1.0);
        assert_eq!(base_delay_days(&cfg, 2, &hints), 2.0);
        assert_eq!(base_delay_days(&cfg, 5, &hints), 16.0);
        assert_eq!(base_delay_days(&cfg, 30, &hints), 180.0);
    }

    #[test]
    fn test_exponential_growth_within_jitter() {
        let cfg = CooldownConfig {
            exponential_base_days: 2.0,
            ..config(CooldownStrategy::Exponential)
        };
        let hints = RetryHints::default();
        for attempt in 2..7 {
            for _ in 0..20 {
                let prev = days(compute_delay(&cfg, attempt - 1, &hints));
                let next = days(compute_delay(&cfg, attempt, &hints));
                let ratio = next / prev;
                // Each side carries ±10%
                assert!(ratio >= 2.0 * 0.9 / 1.1 - 1e-6, "ratio {ratio}");
                assert!(ratio <= 2.0 * 1.1 / 0.9 + 1e-6, "ratio {ratio}");
            }
        }
    }

    #[test]
    fn test_never_below_one_day() {
        let cfg = CooldownConfig {
            exponential_base_days: 0.1,
            ..config(CooldownStrategy::Exponential)
        };
        let d = delay_with_factor(&cfg, 1, &RetryHints::default(), 0.9);
        assert_eq!(days(d), 1.0);
    }

    #[test]
    fn test_adaptive_shortened_by_hints() {
        let cfg = config(CooldownStrategy::Adaptive);
        let none = RetryHints::default();
        let label = RetryHints {
            label_hint: Some("Viper".to_string()),
            year: None,
        };
        let recent_label = RetryHints {
            label_hint: Some("Viper".to_string()),
            year: Some(Utc::now().year()),
        };
        assert_eq!(base_delay_days(&cfg, 1, &none), 30.0);
        assert_eq!(base_delay_days(&cfg, 1, &label), 15.0);
        assert_eq!(base_delay_days(&cfg, 1, &recent_label), 7.5);
    }

    #[test]
    fn test_adaptive_grows_and_caps_at_one_year() {
        let cfg = config(CooldownStrategy::Adaptive);
        let hints = RetryHints::default();
        assert_eq!(base_delay_days(&cfg, 2, &hints), 45.0);
        assert_eq!(base_delay_days(&cfg, 20, &hints), 365.0);
        assert_eq!(days(delay_with_factor(&cfg, 20, &hints, 1.1)), 365.0);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let cfg = config(CooldownStrategy::Fixed);
        let hints = RetryHints::default();
        for _ in 0..100 {
            let d = days(compute_delay(&cfg, 1, &hints));
            assert!((6.3 - 1e-6..=7.7 + 1e-6).contains(&d), "delay {d}");
        }
    }

    #[test]
    fn test_strategy_string_round_trip() {
        for s in [
            CooldownStrategy::Fixed,
            CooldownStrategy::Exponential,
            CooldownStrategy::Adaptive,
        ] {
            assert_eq!(CooldownStrategy::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_config_from_partial_toml() {
        let cfg: CooldownConfig = toml::from_str("strategy = \"exponential\"\nmax_attempts = 3").unwrap();
        assert_eq!(cfg.strategy, CooldownStrategy::Exponential);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.adaptive_cap_days, 365.0);
    }
}
