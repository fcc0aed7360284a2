//! Cooldown queue
//!
//! Decides, per failed attempt, whether a track is retried later or given up
//! on. Tracks are claimed (not peeked) by `poll_ready`, so two workers never
//! process the same track at once.

use super::store::{CooldownEntry, CooldownStatus, CooldownStore, FailureReason, StatusChange};
use super::strategy::{compute_delay, CooldownConfig, RetryHints};
use crate::error::CooldownError;
use chrono::{DateTime, Duration, Utc};
use cratedig_common::events::{EnrichEvent, EventBus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of `schedule`
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Track will become ready at `retry_after`
    Scheduled {
        attempt: u32,
        retry_after: DateTime<Utc>,
        delay: Duration,
    },
    /// Max attempts reached; the track is terminal until reopened
    PermanentlyFailed { attempts: u32 },
}

/// Read-only queue statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CooldownStats {
    /// Entries waiting for their retry time (ready or not)
    pub waiting: usize,
    /// Waiting entries whose retry time has elapsed
    pub ready_now: usize,
    /// Entries currently held by a worker
    pub claimed: usize,
    /// Terminal entries
    pub permanently_failed: usize,
    /// Mean attempt count over non-terminal entries
    pub average_attempts: f64,
}

/// Temporal retry queue
pub struct CooldownQueue {
    store: Arc<dyn CooldownStore>,
    config: CooldownConfig,
    events: Option<EventBus>,
}

impl CooldownQueue {
    /// Create a queue over a store
    pub fn new(store: Arc<dyn CooldownStore>, config: CooldownConfig) -> Self {
        Self {
            store,
            config,
            events: None,
        }
    }

    /// Publish scheduling decisions on an event bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Record a failed attempt
    ///
    /// # Arguments
    /// * `track_id` - External track identifier
    /// * `reason` - Dominant failure reason
    /// * `message` - Aggregated per-provider detail
    /// * `attempt` - 1-based number of the attempt that just failed
    /// * `hints` - Evidence that shortens the adaptive delay
    ///
    /// # Returns
    /// `PermanentlyFailed` at or above `max_attempts`, otherwise the retry time
    pub async fn schedule(
        &self,
        track_id: &str,
        reason: FailureReason,
        message: &str,
        attempt: u32,
        hints: RetryHints,
    ) -> Result<ScheduleOutcome, CooldownError> {
        let now = Utc::now();

        if attempt >= self.config.max_attempts {
            let entry = CooldownEntry {
                track_id: track_id.to_string(),
                reason,
                message: message.to_string(),
                attempt,
                retry_after: now,
                strategy: self.config.strategy,
                status: CooldownStatus::PermanentlyFailed,
                hints,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            };
            self.store.upsert(&entry).await?;

            warn!(
                track_id,
                attempts = attempt,
                reason = %reason,
                "Track permanently failed"
            );
            self.emit(EnrichEvent::TrackPermanentlyFailed {
                track_id: track_id.to_string(),
                attempts: attempt,
                reason: format!("{}: {}", reason, message),
                timestamp: now,
            });
            return Ok(ScheduleOutcome::PermanentlyFailed { attempts: attempt });
        }

        let delay = compute_delay(&self.config, attempt, &hints);
        let retry_after = now + delay;
        let entry = CooldownEntry {
            track_id: track_id.to_string(),
            reason,
            message: message.to_string(),
            attempt,
            retry_after,
            strategy: self.config.strategy,
            status: CooldownStatus::Waiting,
            hints,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert(&entry).await?;

        info!(
            track_id,
            attempt,
            reason = %reason,
            strategy = %self.config.strategy,
            delay_hours = delay.num_hours(),
            "Track scheduled for retry"
        );
        self.emit(EnrichEvent::TrackScheduledForRetry {
            track_id: track_id.to_string(),
            attempt,
            retry_after,
            strategy: self.config.strategy.to_string(),
            timestamp: now,
        });

        Ok(ScheduleOutcome::Scheduled {
            attempt,
            retry_after,
            delay,
        })
    }

    /// Claim up to `limit` entries whose retry time has elapsed, soonest first
    pub async fn poll_ready(&self, limit: usize) -> Result<Vec<CooldownEntry>, CooldownError> {
        self.poll_ready_at(Utc::now(), limit).await
    }

    /// `poll_ready` evaluated at an explicit instant
    pub async fn poll_ready_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CooldownEntry>, CooldownError> {
        let stale_before = now - self.config.claim_ttl();
        let claimed = self.store.claim_ready(now, stale_before, limit).await?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed ready cooldown entries");
        }
        Ok(claimed)
    }

    /// Ready entries without claiming them, soonest first
    pub async fn peek_ready(&self, limit: usize) -> Result<Vec<CooldownEntry>, CooldownError> {
        let now = Utc::now();
        let stale_before = now - self.config.claim_ttl();
        let mut ready: Vec<CooldownEntry> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|e| e.is_claimable(now, stale_before))
            .collect();
        ready.sort_by_key(|e| e.retry_after);
        ready.truncate(limit);
        Ok(ready)
    }

    /// Make a waiting or claimed track retryable immediately
    ///
    /// Returns `false` for a permanently failed track (use `reopen`).
    pub async fn reset(&self, track_id: &str) -> Result<bool, CooldownError> {
        let change = StatusChange {
            from: vec![CooldownStatus::Waiting, CooldownStatus::Claimed],
            to: CooldownStatus::Waiting,
            retry_after: Some(Utc::now()),
            reset_attempts: false,
        };
        let applied = self.apply_existing(track_id, &change).await?;
        if applied {
            info!(track_id, "Cooldown reset");
        }
        Ok(applied)
    }

    /// Return an unprocessed claim to the queue
    pub async fn release(&self, track_id: &str) -> Result<bool, CooldownError> {
        let change = StatusChange {
            from: vec![CooldownStatus::Claimed],
            to: CooldownStatus::Waiting,
            retry_after: None,
            reset_attempts: false,
        };
        self.apply_existing(track_id, &change).await
    }

    /// Manually reopen a permanently failed track with a fresh attempt budget
    pub async fn reopen(&self, track_id: &str) -> Result<bool, CooldownError> {
        let change = StatusChange {
            from: vec![CooldownStatus::PermanentlyFailed],
            to: CooldownStatus::Waiting,
            retry_after: Some(Utc::now()),
            reset_attempts: true,
        };
        let applied = self.apply_existing(track_id, &change).await?;
        if applied {
            info!(track_id, "Permanently failed track reopened");
        }
        Ok(applied)
    }

    /// Remove a track after it resolved
    pub async fn complete(&self, track_id: &str) -> Result<bool, CooldownError> {
        let removed = self.store.delete(track_id).await?;
        if removed {
            debug!(track_id, "Cooldown entry completed");
        }
        Ok(removed)
    }

    /// Load one entry
    pub async fn get(&self, track_id: &str) -> Result<Option<CooldownEntry>, CooldownError> {
        self.store.get(track_id).await
    }

    /// Queue depth and attempt statistics
    pub async fn stats(&self) -> Result<CooldownStats, CooldownError> {
        let now = Utc::now();
        let entries = self.store.list().await?;

        let mut stats = CooldownStats::default();
        let mut attempts_total: u64 = 0;
        for entry in &entries {
            match entry.status {
                CooldownStatus::Waiting => {
                    stats.waiting += 1;
                    if entry.retry_after <= now {
                        stats.ready_now += 1;
                    }
                }
                CooldownStatus::Claimed => stats.claimed += 1,
                CooldownStatus::PermanentlyFailed => {
                    stats.permanently_failed += 1;
                    continue;
                }
            }
            attempts_total += u64::from(entry.attempt);
        }

        let active = stats.waiting + stats.claimed;
        if active > 0 {
            stats.average_attempts = attempts_total as f64 / active as f64;
        }
        Ok(stats)
    }

    async fn apply_existing(
        &self,
        track_id: &str,
        change: &StatusChange,
    ) -> Result<bool, CooldownError> {
        match self.store.apply(track_id, change, Utc::now()).await? {
            Some(_) => Ok(true),
            None => {
                if self.store.get(track_id).await?.is_none() {
                    return Err(CooldownError::NotFound(track_id.to_string()));
                }
                Ok(false)
            }
        }
    }

    fn emit(&self, event: EnrichEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }
}
