//! cratedig-enrich library interface
//!
//! Attribution and resilient enrichment orchestration for crawled track records:
//! per-provider circuit breakers, a temporal cooldown queue, tiered confidence
//! scoring, title normalization with fuzzy matching, and co-occurrence identity
//! resolution for unreleased tracks.

pub mod config;
pub mod cooccurrence;
pub mod cooldown;
pub mod db;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod scoring;
pub mod types;

pub use crate::config::EnrichConfig;
pub use crate::orchestrator::{EnrichmentResult, EnrichmentStatus, Orchestrator};

use crate::cooccurrence::CooccurrenceAnalyzer;
use crate::cooldown::CooldownQueue;
use crate::db::{ScoreRepository, SqliteCooldownStore};
use crate::orchestrator::Provider;
use crate::providers::MusicBrainzProvider;
use crate::resilience::BreakerRegistry;
use cratedig_common::events::EventBus;
use cratedig_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Event bus capacity for in-process subscribers
const EVENT_CAPACITY: usize = 256;

/// Fully wired enrichment components sharing one database and event bus
#[derive(Clone)]
pub struct EnrichService {
    pub db: SqlitePool,
    pub events: EventBus,
    pub breakers: Arc<BreakerRegistry>,
    pub queue: Arc<CooldownQueue>,
    pub scores: ScoreRepository,
    pub orchestrator: Arc<Orchestrator>,
}

impl EnrichService {
    /// Open the configured database and build every component
    pub async fn open(config: &EnrichConfig) -> Result<Self> {
        let db_path = config.database_path();
        let db = db::init_database_pool(&db_path).await?;
        info!(path = %db_path.display(), "Database ready");

        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        if config.musicbrainz.enabled {
            let musicbrainz =
                MusicBrainzProvider::new(&config.musicbrainz.user_agent, config.musicbrainz.timeout())
                    .map_err(|e| Error::Config(format!("MusicBrainz client: {}", e)))?;
            providers.push(Arc::new(musicbrainz));
        }

        Ok(Self::with_providers(config, db, providers))
    }

    /// Build every component over an existing pool with explicit providers
    ///
    /// Providers are consulted in the given order.
    pub fn with_providers(
        config: &EnrichConfig,
        db: SqlitePool,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Self {
        let events = EventBus::new(EVENT_CAPACITY);
        let breakers = Arc::new(config.breaker_registry(Some(events.clone())));
        let queue = Arc::new(
            CooldownQueue::new(
                Arc::new(SqliteCooldownStore::new(db.clone())),
                config.cooldown.clone(),
            )
            .with_events(events.clone()),
        );
        let scores = ScoreRepository::new(db.clone());

        let orchestrator = Orchestrator::new(providers, Arc::clone(&breakers), Arc::clone(&queue))
            .with_fuzzy_threshold(config.matcher.fuzzy_threshold)
            .with_scoring(config.scoring.clone())
            .with_analyzer(CooccurrenceAnalyzer::new(config.cooccurrence.clone()))
            .with_score_repository(scores.clone())
            .with_events(events.clone());

        Self {
            db,
            events,
            breakers,
            queue,
            scores,
            orchestrator: Arc::new(orchestrator),
        }
    }
}
