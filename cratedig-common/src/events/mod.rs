//! Event types for the cratedig event system
//!
//! Provides shared event definitions and the EventBus used to make breaker
//! transitions and enrichment decisions observable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Circuit state as reported in events and statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected immediately
    Open,
    /// Probe calls are allowed to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name used in logs and stats output
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// cratedig event types
///
/// Events are broadcast via EventBus and can be serialized for any transport an
/// observability collaborator chooses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnrichEvent {
    /// A provider's circuit breaker changed state
    BreakerStateChanged {
        /// Provider name
        provider: String,
        /// State before the transition
        from: CircuitState,
        /// State after the transition
        to: CircuitState,
        /// When the transition happened
        timestamp: DateTime<Utc>,
    },

    /// A field of a track received an accepted attribution
    FieldResolved {
        /// External track identifier
        track_id: String,
        /// Field name ("artist", "label", ...)
        field: String,
        /// Attribution method tag
        method: String,
        /// Final confidence value
        confidence: f64,
        /// When the decision was made
        timestamp: DateTime<Utc>,
    },

    /// A track was handed to the cooldown queue
    TrackScheduledForRetry {
        /// External track identifier
        track_id: String,
        /// Attempt number that just failed
        attempt: u32,
        /// Earliest retry time
        retry_after: DateTime<Utc>,
        /// Strategy used to compute the delay
        strategy: String,
        /// When the entry was scheduled
        timestamp: DateTime<Utc>,
    },

    /// A track exhausted its retry budget
    TrackPermanentlyFailed {
        /// External track identifier
        track_id: String,
        /// Attempts made
        attempts: u32,
        /// Aggregated failure reason
        reason: String,
        /// When the track was marked failed
        timestamp: DateTime<Utc>,
    },
}

impl EnrichEvent {
    /// Variant name, for filtering subscribers
    pub fn event_type(&self) -> &str {
        match self {
            EnrichEvent::BreakerStateChanged { .. } => "BreakerStateChanged",
            EnrichEvent::FieldResolved { .. } => "FieldResolved",
            EnrichEvent::TrackScheduledForRetry { .. } => "TrackScheduledForRetry",
            EnrichEvent::TrackPermanentlyFailed { .. } => "TrackPermanentlyFailed",
        }
    }
}

/// Broadcast fan-out for breaker and enrichment events
///
/// Publishing never waits on subscribers. A subscriber that falls more than
/// `capacity` events behind receives `RecvError::Lagged` and skips ahead.
///
/// # Examples
///
/// ```
/// use cratedig_common::events::{CircuitState, EnrichEvent, EventBus};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(EnrichEvent::BreakerStateChanged {
///     provider: "musicbrainz".to_string(),
///     from: CircuitState::Closed,
///     to: CircuitState::Open,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "BreakerStateChanged");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EnrichEvent>,
    capacity: usize,
}

impl EventBus {
    /// Bus holding at most `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Receiver for events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichEvent> {
        self.tx.subscribe()
    }

    /// Publish to every subscriber
    ///
    /// Fails only when nobody is subscribed; otherwise returns the receiver count.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EnrichEvent,
    ) -> Result<usize, broadcast::error::SendError<EnrichEvent>> {
        self.tx.send(event)
    }

    /// Publish, dropping the event when nobody listens
    pub fn emit_lossy(&self, event: EnrichEvent) {
        let _ = self.tx.send(event);
    }

    /// Live receivers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker_event() -> EnrichEvent {
        EnrichEvent::BreakerStateChanged {
            provider: "discogs".to_string(),
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus.emit(breaker_event()).is_err());
        // Lossy variant never fails
        bus.emit_lossy(breaker_event());
    }

    #[test]
    fn test_multiple_subscribers_receive_event() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(breaker_event()).expect("emit should succeed");

        assert_eq!(rx1.try_recv().unwrap().event_type(), "BreakerStateChanged");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "BreakerStateChanged");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(breaker_event()).unwrap();
        assert_eq!(json["type"], "BreakerStateChanged");
        assert_eq!(json["to"], "Closed");

        let back: EnrichEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "BreakerStateChanged");
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(CircuitState::Open.as_str(), "open");
    }
}
