//! SQLite-backed cooldown store
//!
//! Claims use a single `UPDATE ... RETURNING` statement, so concurrent workers
//! (even in separate processes sharing the file) never claim the same track.

use super::{from_millis, to_millis};
use crate::cooldown::{
    CooldownEntry, CooldownStatus, CooldownStore, CooldownStrategy, FailureReason, RetryHints,
    StatusChange,
};
use crate::error::CooldownError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cratedig_common::Error;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const COLUMNS: &str = "track_id, reason, message, attempt, retry_after, strategy, status, \
                       hints, claimed_at, created_at, updated_at";

/// Durable cooldown store
#[derive(Clone)]
pub struct SqliteCooldownStore {
    pool: SqlitePool,
}

impl SqliteCooldownStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<CooldownEntry, CooldownError> {
    let reason: String = row.get("reason");
    let strategy: String = row.get("strategy");
    let status: String = row.get("status");
    let hints: String = row.get("hints");
    let attempt: i64 = row.get("attempt");
    let claimed_at: Option<i64> = row.get("claimed_at");

    Ok(CooldownEntry {
        track_id: row.get("track_id"),
        reason: FailureReason::parse(&reason)
            .ok_or_else(|| Error::Internal(format!("Unknown failure reason: {}", reason)))?,
        message: row.get("message"),
        attempt: u32::try_from(attempt).unwrap_or(0),
        retry_after: from_millis(row.get("retry_after"))?,
        strategy: CooldownStrategy::parse(&strategy)
            .ok_or_else(|| Error::Internal(format!("Unknown cooldown strategy: {}", strategy)))?,
        status: CooldownStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown cooldown status: {}", status)))?,
        hints: serde_json::from_str::<RetryHints>(&hints)
            .map_err(|e| Error::Internal(format!("Corrupt retry hints: {}", e)))?,
        claimed_at: claimed_at.map(from_millis).transpose()?,
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

#[async_trait]
impl CooldownStore for SqliteCooldownStore {
    async fn upsert(&self, entry: &CooldownEntry) -> Result<CooldownEntry, CooldownError> {
        let hints = serde_json::to_string(&entry.hints)
            .map_err(|e| Error::Internal(format!("Failed to encode retry hints: {}", e)))?;

        // created_at is kept from the first insert
        let sql = format!(
            r#"
            INSERT INTO cooldown_entries (
                track_id, reason, message, attempt, retry_after, strategy, status,
                hints, claimed_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(track_id) DO UPDATE SET
                reason = excluded.reason,
                message = excluded.message,
                attempt = excluded.attempt,
                retry_after = excluded.retry_after,
                strategy = excluded.strategy,
                status = excluded.status,
                hints = excluded.hints,
                claimed_at = excluded.claimed_at,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&entry.track_id)
            .bind(entry.reason.as_str())
            .bind(&entry.message)
            .bind(i64::from(entry.attempt))
            .bind(to_millis(entry.retry_after))
            .bind(entry.strategy.as_str())
            .bind(entry.status.as_str())
            .bind(hints)
            .bind(entry.claimed_at.map(to_millis))
            .bind(to_millis(entry.created_at))
            .bind(to_millis(entry.updated_at))
            .fetch_one(&self.pool)
            .await?;

        row_to_entry(&row)
    }

    async fn get(&self, track_id: &str) -> Result<Option<CooldownEntry>, CooldownError> {
        let sql = format!("SELECT {} FROM cooldown_entries WHERE track_id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn delete(&self, track_id: &str) -> Result<bool, CooldownError> {
        let result = sqlx::query("DELETE FROM cooldown_entries WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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

        let sql = format!(
            r#"
            UPDATE cooldown_entries
            SET status = 'claimed', claimed_at = ?, updated_at = ?
            WHERE track_id IN (
                SELECT track_id FROM cooldown_entries
                WHERE (status = 'waiting' AND retry_after <= ?)
                   OR (status = 'claimed' AND (claimed_at IS NULL OR claimed_at <= ?))
                ORDER BY retry_after ASC
                LIMIT ?
            )
            RETURNING {}
            "#,
            COLUMNS
        );

        let now_ms = to_millis(now);
        let rows = sqlx::query(&sql)
            .bind(now_ms)
            .bind(now_ms)
            .bind(now_ms)
            .bind(to_millis(stale_before))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING order is unspecified
        claimed.sort_by_key(|e| e.retry_after);
        Ok(claimed)
    }

    async fn apply(
        &self,
        track_id: &str,
        change: &StatusChange,
        now: DateTime<Utc>,
    ) -> Result<Option<CooldownEntry>, CooldownError> {
        if change.from.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; change.from.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE cooldown_entries
            SET status = ?,
                retry_after = COALESCE(?, retry_after),
                attempt = CASE WHEN ? THEN 0 ELSE attempt END,
                claimed_at = NULL,
                updated_at = ?
            WHERE track_id = ? AND status IN ({})
            RETURNING {}
            "#,
            placeholders, COLUMNS
        );

        let mut query = sqlx::query(&sql)
            .bind(change.to.as_str())
            .bind(change.retry_after.map(to_millis))
            .bind(change.reset_attempts)
            .bind(to_millis(now))
            .bind(track_id);
        for status in &change.from {
            query = query.bind(status.as_str());
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list(&self) -> Result<Vec<CooldownEntry>, CooldownError> {
        let sql = format!("SELECT {} FROM cooldown_entries", COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::Duration;

    fn entry(track_id: &str, retry_after: DateTime<Utc>) -> CooldownEntry {
        let now = Utc::now();
        CooldownEntry {
            track_id: track_id.to_string(),
            reason: FailureReason::ProviderUnavailable,
            message: "musicbrainz: timeout".to_string(),
            attempt: 2,
            retry_after,
            strategy: CooldownStrategy::Adaptive,
            status: CooldownStatus::Waiting,
            hints: RetryHints {
                label_hint: Some("Hospital".to_string()),
                year: Some(2019),
            },
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_preserve_fields() {
        let store = SqliteCooldownStore::new(init_memory_pool().await.unwrap());
        let original = entry("t1", Utc::now() + Duration::days(3));
        store.upsert(&original).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.hints, original.hints);
        assert_eq!(loaded.reason, FailureReason::ProviderUnavailable);
        assert_eq!(loaded.attempt, 2);
        assert_eq!(loaded.retry_after.timestamp_millis(), original.retry_after.timestamp_millis());

        let mut updated = original.clone();
        updated.attempt = 3;
        updated.created_at = original.created_at + Duration::days(1);
        let stored = store.upsert(&updated).await.unwrap();
        assert_eq!(stored.attempt, 3);
        assert_eq!(
            stored.created_at.timestamp_millis(),
            original.created_at.timestamp_millis()
        );
        assert_eq!(store.get("t1").await.unwrap().unwrap().attempt, 3);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_ready_is_ordered_and_exclusive() {
        let store = SqliteCooldownStore::new(init_memory_pool().await.unwrap());
        let now = Utc::now();
        store.upsert(&entry("b", now - Duration::hours(1))).await.unwrap();
        store.upsert(&entry("a", now - Duration::hours(2))).await.unwrap();
        store.upsert(&entry("later", now + Duration::hours(2))).await.unwrap();

        let stale = now - Duration::minutes(15);
        let claimed = store.claim_ready(now, stale, 10).await.unwrap();
        let ids: Vec<&str> = claimed.iter().map(|e| e.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(claimed.iter().all(|e| e.status == CooldownStatus::Claimed));

        assert!(store.claim_ready(now, stale, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_checks_current_status() {
        let store = SqliteCooldownStore::new(init_memory_pool().await.unwrap());
        let now = Utc::now();
        let mut failed = entry("t1", now);
        failed.status = CooldownStatus::PermanentlyFailed;
        failed.attempt = 5;
        store.upsert(&failed).await.unwrap();

        let release = StatusChange {
            from: vec![CooldownStatus::Claimed],
            to: CooldownStatus::Waiting,
            retry_after: None,
            reset_attempts: false,
        };
        assert!(store.apply("t1", &release, now).await.unwrap().is_none());

        let reopen = StatusChange {
            from: vec![CooldownStatus::PermanentlyFailed],
            to: CooldownStatus::Waiting,
            retry_after: Some(now),
            reset_attempts: true,
        };
        let reopened = store.apply("t1", &reopen, now).await.unwrap().unwrap();
        assert_eq!(reopened.status, CooldownStatus::Waiting);
        assert_eq!(reopened.attempt, 0);
    }
}
