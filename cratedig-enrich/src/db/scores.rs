//! Confidence score audit trail
//!
//! One row per enriched field per resolution, never updated.

use super::{from_millis, to_millis};
use crate::scoring::{AttributionMethod, ConfidenceScore, DisambiguationFactors};
use crate::types::EnrichField;
use chrono::{DateTime, Utc};
use cratedig_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Persisted attribution for one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub id: Uuid,
    pub track_id: String,
    pub field: EnrichField,
    /// Value that was attributed
    pub value: String,
    pub method: AttributionMethod,
    /// Provider or verifier the value came from
    pub provider: String,
    pub base: f64,
    pub boost: f64,
    pub final_value: f64,
    pub factors: Option<DisambiguationFactors>,
    /// Raw fuzzy score (0-100) behind a fuzzy-tier value
    pub fuzzy_raw: Option<f64>,
    /// Model probability behind a statistical-tier value
    pub model_probability: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Audit repository for confidence scores
#[derive(Clone)]
pub struct ScoreRepository {
    pool: SqlitePool,
}

impl ScoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an audit row for an accepted attribution
    pub async fn record(
        &self,
        track_id: &str,
        field: EnrichField,
        value: &str,
        score: &ConfidenceScore,
    ) -> Result<ScoreRecord> {
        let record = ScoreRecord {
            id: Uuid::new_v4(),
            track_id: track_id.to_string(),
            field,
            value: value.to_string(),
            method: score.method,
            provider: score.source.clone(),
            base: score.value,
            boost: score.contextual_boost,
            final_value: score.final_value,
            factors: score.factors.clone(),
            fuzzy_raw: score.fuzzy_raw.filter(|v| v.is_finite()),
            model_probability: score.model_probability.filter(|v| v.is_finite()),
            created_at: score.created_at,
        };

        let factors = record
            .factors
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to encode factors: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO confidence_scores (
                id, track_id, field, value, method, provider, base, boost, final,
                factors, fuzzy_raw, model_probability, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.track_id)
        .bind(record.field.as_str())
        .bind(&record.value)
        .bind(record.method.as_str())
        .bind(&record.provider)
        .bind(record.base)
        .bind(record.boost)
        .bind(record.final_value)
        .bind(factors)
        .bind(record.fuzzy_raw)
        .bind(record.model_probability)
        .bind(to_millis(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// Every audit row for a track, oldest first
    pub async fn list_for_track(&self, track_id: &str) -> Result<Vec<ScoreRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, track_id, field, value, method, provider, base, boost, final,
                   factors, fuzzy_raw, model_probability, created_at
            FROM confidence_scores
            WHERE track_id = ?
            ORDER BY created_at ASC, field ASC
            "#,
        )
        .bind(track_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScoreRecord> {
                let id: String = row.get("id");
                let field: String = row.get("field");
                let method: String = row.get("method");
                let factors = row
                    .get::<Option<String>, _>("factors")
                    .map(|f| {
                        serde_json::from_str::<DisambiguationFactors>(&f).map_err(|e| {
                            Error::Internal(format!("Bad factors for score {}: {}", id, e))
                        })
                    })
                    .transpose()?;

                Ok(ScoreRecord {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| Error::Internal(format!("Bad score id {}: {}", id, e)))?,
                    track_id: row.get("track_id"),
                    field: EnrichField::parse(&field)
                        .ok_or_else(|| Error::Internal(format!("Unknown field: {}", field)))?,
                    value: row.get("value"),
                    method: AttributionMethod::parse(&method)
                        .ok_or_else(|| Error::Internal(format!("Unknown method: {}", method)))?,
                    provider: row.get("provider"),
                    base: row.get("base"),
                    boost: row.get("boost"),
                    final_value: row.get("final"),
                    factors,
                    fuzzy_raw: row.get("fuzzy_raw"),
                    model_probability: row.get("model_probability"),
                    created_at: from_millis(row.get("created_at"))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::scoring::{AgreementFactor, ConfidenceScorer};

    #[tokio::test]
    async fn test_record_and_list() {
        let repo = ScoreRepository::new(init_memory_pool().await.unwrap());
        let scorer = ConfidenceScorer::new();

        let factors = DisambiguationFactors {
            candidate_count: 4,
            agreements: vec![AgreementFactor::Label, AgreementFactor::Year],
        };
        let artist = scorer.score_disambiguated("beatport", &factors);
        let label = scorer.score_contextual("cooccurrence", 0.5);

        repo.record("t1", EnrichField::Artist, "Matrix & Futurebound", &artist)
            .await
            .unwrap();
        repo.record("t1", EnrichField::Label, "Viper Recordings", &label)
            .await
            .unwrap();
        repo.record("t2", EnrichField::Title, "Other", &label).await.unwrap();

        let rows = repo.list_for_track("t1").await.unwrap();
        assert_eq!(rows.len(), 2);
        let artist_row = rows.iter().find(|r| r.field == EnrichField::Artist).unwrap();
        assert_eq!(artist_row.method, AttributionMethod::Disambiguated);
        assert_eq!(artist_row.factors.as_ref().unwrap().candidate_count, 4);
        assert!((artist_row.final_value - 0.93).abs() < 1e-9);

        assert!(repo.list_for_track("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tier_inputs_are_persisted() {
        let repo = ScoreRepository::new(init_memory_pool().await.unwrap());
        let scorer = ConfidenceScorer::new();

        let fuzzy = scorer.score_fuzzy("discogs", 92.5);
        let model = scorer.score_model("cooccurrence", 0.87);
        repo.record("t1", EnrichField::Title, "Shadows", &fuzzy).await.unwrap();
        repo.record("t1", EnrichField::Artist, "Phace", &model).await.unwrap();

        let rows = repo.list_for_track("t1").await.unwrap();
        let title = rows.iter().find(|r| r.field == EnrichField::Title).unwrap();
        assert_eq!(title.fuzzy_raw, Some(92.5));
        assert_eq!(title.model_probability, None);
        assert_eq!(title.final_value, fuzzy.final_value);

        let artist = rows.iter().find(|r| r.field == EnrichField::Artist).unwrap();
        assert_eq!(artist.model_probability, Some(0.87));
        assert_eq!(artist.fuzzy_raw, None);
    }

    #[tokio::test]
    async fn test_corrupt_factors_are_reported() {
        let pool = init_memory_pool().await.unwrap();
        let repo = ScoreRepository::new(pool.clone());
        let score = ConfidenceScorer::new().score_contextual("cooccurrence", 0.5);
        let record = repo.record("t1", EnrichField::Label, "Vision", &score).await.unwrap();

        sqlx::query("UPDATE confidence_scores SET factors = '{not json' WHERE id = ?")
            .bind(record.id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let err = repo.list_for_track("t1").await.unwrap_err();
        assert!(err.to_string().contains("Bad factors"), "{}", err);
    }
}
