//! SQLite persistence
//!
//! Cooldown entries survive restarts; confidence scores are kept for audit.

pub mod cooldown;
pub mod scores;

pub use cooldown::SqliteCooldownStore;
pub use scores::{ScoreRecord, ScoreRepository};

use chrono::{DateTime, TimeZone, Utc};
use cratedig_common::{Error, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the parent directory and the tables if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database (each connection would otherwise get
/// its own empty database)
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Timestamps are unix milliseconds so ordering and comparison stay numeric
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cooldown_entries (
            track_id TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            attempt INTEGER NOT NULL,
            retry_after INTEGER NOT NULL,
            strategy TEXT NOT NULL,
            status TEXT NOT NULL,
            hints TEXT NOT NULL DEFAULT '{}',
            claimed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cooldown_ready ON cooldown_entries (status, retry_after)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS confidence_scores (
            id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            field TEXT NOT NULL,
            value TEXT NOT NULL,
            method TEXT NOT NULL,
            provider TEXT NOT NULL,
            base REAL NOT NULL,
            boost REAL NOT NULL DEFAULT 0.0,
            final REAL NOT NULL,
            factors TEXT,
            fuzzy_raw REAL,
            model_probability REAL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before the score inputs were audited
    add_missing_columns(
        pool,
        "confidence_scores",
        &[("fuzzy_raw", "REAL"), ("model_probability", "REAL")],
    )
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scores_track ON confidence_scores (track_id, created_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (cooldown_entries, confidence_scores)");

    Ok(())
}

/// Add nullable `columns` that `table` lacks
async fn add_missing_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<()> {
    let existing: Vec<String> = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    for (name, sql_type) in columns {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, sql_type))
            .execute(pool)
            .await?;
        tracing::info!(table, column = *name, "Added missing column");
    }
    Ok(())
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Internal(format!("Timestamp out of range: {}", ms)))
}
