//! Failure isolation for external providers

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerOverride, BreakerStats, CircuitBreaker,
};
pub use registry::BreakerRegistry;
