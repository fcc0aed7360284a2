//! Per-provider circuit breaker
//!
//! # States
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls fail immediately with `BreakerError::Open`
//! - Half-Open: calls pass through as probes; enough successes close the circuit
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      consecutive_failures >= failure_threshold
//! Open      → Half-Open: open_duration elapsed (checked before the next call)
//! Half-Open → Closed:    consecutive_successes >= success_threshold
//! Half-Open → Open:      any failure
//! ```
//! Open never moves to Closed directly.
//!
//! State lives behind one mutex per breaker, so transitions are linearizable per
//! provider and unrelated providers never contend. The lock is never held across
//! the wrapped call.

use chrono::{DateTime, Utc};
use cratedig_common::events::{CircuitState, EnrichEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker thresholds and durations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit (default 5)
    pub failure_threshold: u32,
    /// Consecutive Half-Open successes that close the circuit (default 2)
    pub success_threshold: u32,
    /// How long the circuit stays open before probing (default 60s)
    #[serde(rename = "open_duration_secs", with = "duration_secs")]
    pub open_duration: Duration,
    /// Per-call timeout; a timed-out call counts as a failure (default 30s)
    #[serde(rename = "call_timeout_secs", with = "opt_duration_secs")]
    pub call_timeout: Option<Duration>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(60),
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Per-provider breaker settings layered on the `[breaker]` defaults
///
/// Unset keys inherit. A zero `call_timeout_secs` disables the timeout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
    #[serde(
        rename = "open_duration_secs",
        with = "maybe_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub open_duration: Option<Duration>,
    #[serde(
        rename = "call_timeout_secs",
        with = "maybe_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub call_timeout: Option<Duration>,
}

impl BreakerOverride {
    /// `base` with every set key replaced
    pub fn apply(&self, base: &BreakerConfig) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            open_duration: self.open_duration.unwrap_or(base.open_duration),
            call_timeout: match self.call_timeout {
                Some(timeout) if timeout.is_zero() => None,
                Some(timeout) => Some(timeout),
                None => base.call_timeout,
            },
        }
    }
}

/// Errors produced by a breaker-wrapped call
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Circuit is open; the call was not attempted
    #[error("Circuit open for provider {provider} (probe in {retry_in:?})")]
    Open { provider: String, retry_in: Duration },

    /// The wrapped call exceeded the configured timeout
    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    /// The wrapped call itself failed
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the call was rejected without being attempted
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Read-only breaker statistics for observability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            last_failure: None,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }
}

/// Circuit breaker guarding one named provider
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            events: None,
        }
    }

    /// Publish state transitions on an event bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current stored state
    ///
    /// An Open breaker whose open duration has elapsed still reports Open until
    /// the next call moves it to Half-Open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Execute `op` through the breaker, applying the configured call timeout
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_timeout(self.config.call_timeout, op).await
    }

    /// Execute `op` through the breaker with an explicit timeout
    ///
    /// # Errors
    /// - `BreakerError::Open` when the circuit rejects the call (not counted as a failure)
    /// - `BreakerError::Timeout` when the call exceeds `timeout` (counted as a failure)
    /// - `BreakerError::Inner` when the call fails (counted as a failure)
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Option<Duration>,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire::<E>()?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result.map_err(BreakerError::Inner),
                Err(_) => Err(BreakerError::Timeout {
                    provider: self.name.clone(),
                    after: limit,
                }),
            },
            None => op().await.map_err(BreakerError::Inner),
        };

        match &outcome {
            Ok(_) => self.record_success(),
            Err(BreakerError::Timeout { after, .. }) => {
                warn!(provider = %self.name, timeout = ?after, "Provider call timed out");
                self.record_failure();
            }
            Err(_) => self.record_failure(),
        }

        outcome
    }

    /// Admission check performed before every call
    ///
    /// Moves Open → Half-Open once the open duration has elapsed.
    pub fn try_acquire<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.lock();
        inner.total_calls += 1;

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or(self.config.open_duration);

        if elapsed >= self.config.open_duration {
            self.transition(&mut inner, CircuitState::HalfOpen);
            return Ok(());
        }

        inner.total_rejections += 1;
        let retry_in = self.config.open_duration.saturating_sub(elapsed);
        debug!(provider = %self.name, ?retry_in, "Circuit open, rejecting call");
        Err(BreakerError::Open {
            provider: self.name.clone(),
            retry_in,
        })
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // Late completion of a call dispatched before the circuit opened.
                // Recovery must go through Half-Open.
                debug!(provider = %self.name, "Ignoring late success while open");
            }
        }
    }

    /// Report a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Force the circuit closed (operator action)
    pub fn reset(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
            }
            // Open must still pass through Half-Open
            CircuitState::Open => {
                self.transition(&mut inner, CircuitState::HalfOpen);
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Closed),
        }
    }

    /// Force the circuit open (operator action)
    pub fn trip(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
        } else {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Snapshot statistics
    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            provider: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            last_failure: inner.last_failure,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
                warn!(
                    provider = %self.name,
                    from = %from,
                    consecutive_failures = inner.consecutive_failures,
                    open_for = ?self.config.open_duration,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes = 0;
                info!(provider = %self.name, "Circuit half-open, probing provider");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.opened_at = None;
                info!(provider = %self.name, from = %from, "Circuit closed");
            }
        }

        if let Some(events) = &self.events {
            events.emit_lossy(EnrichEvent::BreakerStateChanged {
                provider: self.name.clone(),
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // A panic while holding the lock cannot leave counters half-written,
        // so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        // 0 means "no timeout" so the value survives formats without null
        s.serialize_u64(d.map(|d| d.as_secs()).unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}

mod maybe_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-provider",
            BreakerConfig {
                failure_threshold: failures,
                success_threshold: successes,
                open_duration: Duration::from_secs(60),
                call_timeout: None,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        b.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_closed_passes_calls_through() {
        let b = breaker(5, 2);
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_failure_threshold() {
        let b = breaker(3, 2);
        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(b.state(), CircuitState::Closed);

        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        // Rejected without running the closure
        let mut ran = false;
        let result: Result<(), BreakerError<&str>> = b
            .call(|| {
                ran = true;
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().is_rejection());
        assert!(!ran);
        assert_eq!(b.stats().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let b = breaker(3, 2);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_open_duration() {
        let b = breaker(1, 2);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(succeed(&b).await.unwrap_err().is_rejection());

        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, 3);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        // Fresh open window
        assert!(succeed(&b).await.unwrap_err().is_rejection());
    }

    #[tokio::test]
    async fn test_late_success_does_not_close_open_circuit() {
        let b = breaker(1, 1);
        let _ = fail(&b).await;
        b.record_success();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let b = breaker(1, 1);
        let result: Result<(), BreakerError<&str>> = b
            .call_with_timeout(Some(Duration::from_millis(100)), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let b = breaker(1, 1).with_events(bus);

        let _ = fail(&b).await;
        match rx.try_recv().unwrap() {
            EnrichEvent::BreakerStateChanged { provider, from, to, .. } => {
                assert_eq!(provider, "test-provider");
                assert_eq!(from, CircuitState::Closed);
                assert_eq!(to, CircuitState::Open);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_reset_from_open_passes_through_half_open() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let b = breaker(1, 1).with_events(bus);
        b.trip();
        b.reset();

        let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                EnrichEvent::BreakerStateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[test]
    fn test_config_from_toml() {
        let cfg: BreakerConfig =
            toml::from_str("failure_threshold = 3\nopen_duration_secs = 10\ncall_timeout_secs = 0\n").unwrap();
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.success_threshold, 2);
        assert_eq!(cfg.open_duration, Duration::from_secs(10));
        assert_eq!(cfg.call_timeout, None);
    }
}
