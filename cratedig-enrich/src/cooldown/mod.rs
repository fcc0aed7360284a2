//! Temporal retry queue for tracks no provider could resolve

pub mod queue;
pub mod store;
pub mod strategy;

pub use queue::{CooldownQueue, CooldownStats, ScheduleOutcome};
pub use store::{
    CooldownEntry, CooldownStatus, CooldownStore, FailureReason, InMemoryCooldownStore,
    StatusChange,
};
pub use strategy::{CooldownConfig, CooldownStrategy, RetryHints};
