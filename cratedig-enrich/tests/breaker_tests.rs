//! Integration tests for per-provider circuit breakers under concurrent load

use cratedig_common::events::{CircuitState, EnrichEvent, EventBus};
use cratedig_enrich::error::ProviderError;
use cratedig_enrich::resilience::{BreakerConfig, BreakerError, BreakerRegistry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn registry(failure_threshold: u32, open_duration: Duration) -> BreakerRegistry {
    BreakerRegistry::new(BreakerConfig {
        failure_threshold,
        success_threshold: 2,
        open_duration,
        call_timeout: None,
    })
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_failures_open_circuit_once() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let registry = Arc::new(registry(3, Duration::from_secs(60)).with_events(events));
    let attempted = Arc::new(AtomicUsize::new(0));

    let mut join_set = JoinSet::new();
    for _ in 0..20 {
        let registry = Arc::clone(&registry);
        let attempted = Arc::clone(&attempted);
        join_set.spawn(async move {
            let breaker = registry.get("discogs");
            breaker
                .call(|| async {
                    attempted.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Err::<(), _>(ProviderError::Network("connection refused".into()))
                })
                .await
        });
    }

    let mut rejected = 0;
    while let Some(result) = join_set.join_next().await {
        match result.unwrap() {
            Err(BreakerError::Open { .. }) => rejected += 1,
            Err(BreakerError::Inner(_)) => {}
            other => panic!("Unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    let stats = registry.get("discogs").stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(attempted.load(Ordering::SeqCst) + rejected, 20);
    assert_eq!(stats.total_rejections as usize, rejected);
    assert!(attempted.load(Ordering::SeqCst) >= 3);

    // Exactly one Closed → Open transition, however many calls raced
    let mut transitions = 0;
    while let Ok(event) = rx.try_recv() {
        if let EnrichEvent::BreakerStateChanged { from, to, .. } = event {
            assert_eq!((from, to), (CircuitState::Closed, CircuitState::Open));
            transitions += 1;
        }
    }
    assert_eq!(transitions, 1);
}

#[tokio::test]
async fn test_providers_are_isolated() {
    let registry = Arc::new(registry(1, Duration::from_secs(60)));

    let _ = registry
        .get("flaky")
        .call(|| async { Err::<(), _>(ProviderError::RateLimited) })
        .await;

    let mut join_set = JoinSet::new();
    for _ in 0..5 {
        let registry = Arc::clone(&registry);
        join_set.spawn(async move {
            registry
                .get("healthy")
                .call(|| async { Ok::<_, ProviderError>(42) })
                .await
        });
    }
    while let Some(result) = join_set.join_next().await {
        assert_eq!(result.unwrap().unwrap(), 42);
    }

    assert_eq!(registry.get("flaky").state(), CircuitState::Open);
    assert_eq!(registry.get("healthy").state(), CircuitState::Closed);
    let mut providers = registry.providers();
    providers.sort();
    assert_eq!(providers, vec!["flaky".to_string(), "healthy".to_string()]);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_recovery_through_half_open() {
    let registry = registry(1, Duration::from_millis(50));
    let breaker = registry.get("musicbrainz");

    let _ = breaker
        .call(|| async { Err::<(), _>(ProviderError::RateLimited) })
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.call(|| async { Ok::<_, ProviderError>(()) }).await;
    assert!(matches!(rejected, Err(BreakerError::Open { .. })));

    tokio::time::sleep(Duration::from_millis(80)).await;

    // First probe moves to Half-Open; success_threshold = 2 closes on the second
    breaker.call(|| async { Ok::<_, ProviderError>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.call(|| async { Ok::<_, ProviderError>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_failed_probe_reopens() {
    let registry = registry(1, Duration::from_millis(30));
    let breaker = registry.get("spotify");

    let _ = breaker
        .call(|| async { Err::<(), _>(ProviderError::RateLimited) })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let probe = breaker
        .call(|| async { Err::<(), _>(ProviderError::Network("reset".into())) })
        .await;
    assert!(matches!(probe, Err(BreakerError::Inner(_))));
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn test_slow_call_times_out_and_counts_as_failure() {
    let registry = BreakerRegistry::new(BreakerConfig {
        failure_threshold: 1,
        call_timeout: Some(Duration::from_millis(20)),
        ..BreakerConfig::default()
    });
    let breaker = registry.get("slow");

    let result = breaker
        .call(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ProviderError>(())
        })
        .await;

    assert!(matches!(result, Err(BreakerError::Timeout { .. })));
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.stats().total_failures, 1);
}
