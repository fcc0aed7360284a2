//! Cooldown entry storage
//!
//! The queue talks to storage through `CooldownStore`. Two implementations:
//! - `InMemoryCooldownStore`: keyed map, one lock per entry
//! - `SqliteCooldownStore` (in `crate::db::cooldown`): durable, survives restarts
//!
//! Every mutating operation is a compare-and-set on the entry status so two
//! workers can never both claim the same track.

use super::strategy::{CooldownStrategy, RetryHints};
use crate::error::CooldownError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Why a track ended up in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every provider answered, none had the track
    NoMatch,
    /// Providers failed, timed out or had their breaker open
    ProviderUnavailable,
    /// Providers answered but no result cleared the field minimum
    LowConfidence,
}

impl FailureReason {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoMatch => "no_match",
            FailureReason::ProviderUnavailable => "provider_unavailable",
            FailureReason::LowConfidence => "low_confidence",
        }
    }

    /// Parse the string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_match" => Some(FailureReason::NoMatch),
            "provider_unavailable" => Some(FailureReason::ProviderUnavailable),
            "low_confidence" => Some(FailureReason::LowConfidence),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a cooldown entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownStatus {
    /// Waiting for `retry_after`
    Waiting,
    /// Handed to a worker by `poll_ready`
    Claimed,
    /// Max attempts reached; only a manual reopen brings it back
    PermanentlyFailed,
}

impl CooldownStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownStatus::Waiting => "waiting",
            CooldownStatus::Claimed => "claimed",
            CooldownStatus::PermanentlyFailed => "permanently_failed",
        }
    }

    /// Parse the string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(CooldownStatus::Waiting),
            "claimed" => Some(CooldownStatus::Claimed),
            "permanently_failed" => Some(CooldownStatus::PermanentlyFailed),
            _ => None,
        }
    }
}

/// One track waiting for a retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub track_id: String,
    pub reason: FailureReason,
    /// Per-provider detail aggregated by the orchestrator
    pub message: String,
    /// Number of attempts that have failed so far
    pub attempt: u32,
    pub retry_after: DateTime<Utc>,
    pub strategy: CooldownStrategy,
    pub status: CooldownStatus,
    pub hints: RetryHints,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CooldownEntry {
    /// True when a worker may pick this entry up at `now`
    ///
    /// Waiting entries become claimable once `retry_after` elapses; claimed
    /// entries become claimable again once their claim is older than `stale_before`.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            CooldownStatus::Waiting => self.retry_after <= now,
            CooldownStatus::Claimed => self.claimed_at.map_or(true, |at| at <= stale_before),
            CooldownStatus::PermanentlyFailed => false,
        }
    }
}

/// Status change applied atomically to one entry
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Statuses the entry must currently have
    pub from: Vec<CooldownStatus>,
    /// New status
    pub to: CooldownStatus,
    /// New retry time, if it changes
    pub retry_after: Option<DateTime<Utc>>,
    /// Start the attempt count over
    pub reset_attempts: bool,
}

/// Storage backend for the cooldown queue
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Insert or replace the entry for `entry.track_id` in one step
    ///
    /// An existing entry keeps its `created_at`. Returns the stored entry.
    async fn upsert(&self, entry: &CooldownEntry) -> Result<CooldownEntry, CooldownError>;

    /// Load one entry
    async fn get(&self, track_id: &str) -> Result<Option<CooldownEntry>, CooldownError>;

    /// Delete one entry; returns whether it existed
    async fn delete(&self, track_id: &str) -> Result<bool, CooldownError>;

    /// Atomically claim up to `limit` claimable entries, soonest `retry_after` first
    ///
    /// Claimed entries are returned already in `Claimed` status with
    /// `claimed_at = now`.
    async fn claim_ready(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CooldownEntry>, CooldownError>;

    /// Apply `change` if the entry exists and its status is in `change.from`
    ///
    /// Returns the updated entry, or `None` when the entry is missing or in
    /// another status.
    async fn apply(
        &self,
        track_id: &str,
        change: &StatusChange,
        now: DateTime<Utc>,
    ) -> Result<Option<CooldownEntry>, CooldownError>;

    /// Every entry, in no particular order
    async fn list(&self) -> Result<Vec<CooldownEntry>, CooldownError>;
}

/// Process-local store: a keyed map with one lock per entry
///
/// The map lock is held only to find, insert or remove keys; entry state is
/// changed under the entry's own lock.
#[derive(Default)]
pub struct InMemoryCooldownStore {
    entries: RwLock<HashMap<String, Arc<Mutex<CooldownEntry>>>>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, track_id: &str) -> Option<Arc<Mutex<CooldownEntry>>> {
        let map = self.entries.read().unwrap_or_else(|p| p.into_inner());
        map.get(track_id).cloned()
    }

    fn slots(&self) -> Vec<Arc<Mutex<CooldownEntry>>> {
        let map = self.entries.read().unwrap_or_else(|p| p.into_inner());
        map.values().cloned().collect()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn upsert(&self, entry: &CooldownEntry) -> Result<CooldownEntry, CooldownError> {
        let replace = |slot: &Mutex<CooldownEntry>| {
            let mut current = slot.lock().unwrap_or_else(|p| p.into_inner());
            let created_at = current.created_at;
            *current = CooldownEntry {
                created_at,
                ..entry.clone()
            };
            current.clone()
        };

        if let Some(slot) = self.slot(&entry.track_id) {
            return Ok(replace(slot.as_ref()));
        }
        let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
        match map.get(&entry.track_id) {
            Some(slot) => Ok(replace(slot.as_ref())),
            None => {
                map.insert(entry.track_id.clone(), Arc::new(Mutex::new(entry.clone())));
                Ok(entry.clone())
            }
        }
    }

    async fn get(&self, track_id: &str) -> Result<Option<CooldownEntry>, CooldownError> {
        Ok(self
            .slot(track_id)
            .map(|slot| slot.lock().unwrap_or_else(|p| p.into_inner()).clone()))
    }

    async fn delete(&self, track_id: &str) -> Result<bool, CooldownError> {
        let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
        Ok(map.remove(track_id).is_some())
    }

    async fn claim_ready(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CooldownEntry>, CooldownError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Snapshot candidates, soonest first
        let mut candidates: Vec<(DateTime<Utc>, Arc<Mutex<CooldownEntry>>)> = self
            .slots()
            .into_iter()
            .filter_map(|slot| {
                let retry_after = {
                    let entry = slot.lock().unwrap_or_else(|p| p.into_inner());
                    if !entry.is_claimable(now, stale_before) {
                        return None;
                    }
                    entry.retry_after
                };
                Some((retry_after, slot))
            })
            .collect();
        candidates.sort_by_key(|(retry_after, _)| *retry_after);

        let mut claimed = Vec::new();
        for (_, slot) in candidates {
            if claimed.len() >= limit {
                break;
            }
            let mut entry = slot.lock().unwrap_or_else(|p| p.into_inner());
            // Re-check under the entry lock; another worker may have won
            if !entry.is_claimable(now, stale_before) {
                continue;
            }
            entry.status = CooldownStatus::Claimed;
            entry.claimed_at = Some(now);
            entry.updated_at = now;
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn apply(
        &self,
        track_id: &str,
        change: &StatusChange,
        now: DateTime<Utc>,
    ) -> Result<Option<CooldownEntry>, CooldownError> {
        let Some(slot) = self.slot(track_id) else {
            return Ok(None);
        };
        let mut entry = slot.lock().unwrap_or_else(|p| p.into_inner());
        if !change.from.contains(&entry.status) {
            return Ok(None);
        }
        entry.status = change.to;
        if let Some(retry_after) = change.retry_after {
            entry.retry_after = retry_after;
        }
        if change.reset_attempts {
            entry.attempt = 0;
        }
        entry.claimed_at = None;
        entry.updated_at = now;
        Ok(Some(entry.clone()))
    }

    async fn list(&self) -> Result<Vec<CooldownEntry>, CooldownError> {
        Ok(self
            .slots()
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(track_id: &str, retry_after: DateTime<Utc>) -> CooldownEntry {
        let now = Utc::now();
        CooldownEntry {
            track_id: track_id.to_string(),
            reason: FailureReason::NoMatch,
            message: String::new(),
            attempt: 1,
            retry_after,
            strategy: CooldownStrategy::Fixed,
            status: CooldownStatus::Waiting,
            hints: RetryHints::default(),
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_claim_orders_soonest_first_and_respects_limit() {
        let store = InMemoryCooldownStore::new();
        let now = Utc::now();
        store.upsert(&entry("late", now - Duration::hours(1))).await.unwrap();
        store.upsert(&entry("early", now - Duration::hours(5))).await.unwrap();
        store.upsert(&entry("future", now + Duration::hours(5))).await.unwrap();

        let claimed = store.claim_ready(now, now - Duration::minutes(15), 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].track_id, "early");
        assert_eq!(claimed[0].status, CooldownStatus::Claimed);

        let claimed = store.claim_ready(now, now - Duration::minutes(15), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].track_id, "late");
    }

    #[tokio::test]
    async fn test_stale_claims_are_reclaimable() {
        let store = InMemoryCooldownStore::new();
        let now = Utc::now();
        store.upsert(&entry("t", now - Duration::hours(1))).await.unwrap();
        let ttl = Duration::minutes(15);

        assert_eq!(store.claim_ready(now, now - ttl, 10).await.unwrap().len(), 1);
        assert!(store.claim_ready(now, now - ttl, 10).await.unwrap().is_empty());

        let later = now + Duration::minutes(20);
        assert_eq!(store.claim_ready(later, later - ttl, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_is_compare_and_set() {
        let store = InMemoryCooldownStore::new();
        let now = Utc::now();
        store.upsert(&entry("t", now + Duration::days(3))).await.unwrap();

        let release = StatusChange {
            from: vec![CooldownStatus::Claimed],
            to: CooldownStatus::Waiting,
            retry_after: None,
            reset_attempts: false,
        };
        assert!(store.apply("t", &release, now).await.unwrap().is_none());
        assert!(store.apply("missing", &release, now).await.unwrap().is_none());

        let reset = StatusChange {
            from: vec![CooldownStatus::Waiting],
            to: CooldownStatus::Waiting,
            retry_after: Some(now),
            reset_attempts: false,
        };
        let updated = store.apply("t", &reset, now).await.unwrap().unwrap();
        assert_eq!(updated.retry_after, now);
        assert_eq!(updated.attempt, 1);
    }

    #[tokio::test]
    async fn test_permanently_failed_never_claimable() {
        let store = InMemoryCooldownStore::new();
        let now = Utc::now();
        let mut failed = entry("dead", now - Duration::days(30));
        failed.status = CooldownStatus::PermanentlyFailed;
        store.upsert(&failed).await.unwrap();

        assert!(store
            .claim_ready(now, now, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(store.delete("dead").await.unwrap());
        assert!(!store.delete("dead").await.unwrap());
    }
}
