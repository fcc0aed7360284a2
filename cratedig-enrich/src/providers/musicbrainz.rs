//! MusicBrainz provider
//!
//! - MBID lookup when the request already carries a recording id (exact-identifier tier)
//! - Recording search otherwise (community-database tier)
//!
//! Rate limited to 1 request/second as MusicBrainz requires. An ISRC on the
//! recording counts as a verification link; the number of releases carrying
//! it is the popularity evidence.

use crate::error::ProviderError;
use crate::orchestrator::{LookupQuery, Provider, ProviderKind, ProviderResponse};
use crate::types::{IdentifierMatch, MatchCandidate};
use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

pub const PROVIDER_NAME: &str = "musicbrainz";

const MUSICBRAINZ_API_URL: &str = "https://musicbrainz.org/ws/2";
const SEARCH_LIMIT: &str = "10";

/// Releases at which popularity evidence saturates
const POPULAR_RELEASE_COUNT: f64 = 10.0;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
    title: String,
    /// Search relevance, 0-100
    #[serde(default)]
    score: Option<u32>,
    /// Milliseconds
    #[serde(default)]
    length: Option<u64>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<Release>,
    #[serde(default)]
    isrcs: Vec<String>,
    #[serde(rename = "first-release-date", default)]
    first_release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(rename = "label-info", default)]
    label_info: Vec<LabelInfo>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelInfo {
    #[serde(default)]
    label: Option<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

impl Recording {
    fn into_candidate(self, identifier_match: Option<IdentifierMatch>) -> MatchCandidate {
        let label = self
            .releases
            .iter()
            .flat_map(|r| r.label_info.iter())
            .find_map(|li| li.label.as_ref().map(|l| l.name.clone()));

        let year = self
            .first_release_date
            .as_deref()
            .or_else(|| self.releases.iter().find_map(|r| r.date.as_deref()))
            .and_then(parse_year);

        let popularity = if self.releases.is_empty() {
            None
        } else {
            Some((self.releases.len() as f64 / POPULAR_RELEASE_COUNT).min(1.0))
        };

        MatchCandidate {
            title: self.title,
            artists: self.artist_credit.into_iter().map(|ac| ac.name).collect(),
            label,
            duration_secs: self.length.map(|ms| (ms / 1000) as u32),
            year,
            genre: None,
            provider: PROVIDER_NAME.to_string(),
            relevance: self.score.map(|s| s as f64 / 100.0),
            identifier_match,
            verification_link: self.isrcs.first().map(|isrc| format!("isrc:{}", isrc)),
            popularity,
            provider_id: Some(self.id),
        }
    }
}

fn parse_year(date: &str) -> Option<i32> {
    date.get(..4).and_then(|y| y.parse().ok())
}

/// Build a Lucene query for the recording search endpoint
fn search_query(title: &str, artist: Option<&str>) -> String {
    let escape = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    match artist {
        Some(artist) => format!(
            "recording:\"{}\" AND artist:\"{}\"",
            escape(title),
            escape(artist)
        ),
        None => format!("recording:\"{}\"", escape(title)),
    }
}

/// MusicBrainz web service client
pub struct MusicBrainzProvider {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl MusicBrainzProvider {
    /// Create a client
    ///
    /// # Arguments
    /// * `user_agent` - Contact string MusicBrainz requires from every client
    /// * `timeout` - HTTP request timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(user_agent, timeout, MUSICBRAINZ_API_URL)
    }

    /// Create a client against a mirror
    pub fn with_base_url(
        user_agent: &str,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // MusicBrainz rate limit: 1 request/second
        let quota = Quota::per_second(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Option<String>, ProviderError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .text()
            .await
            .map(Some)
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    /// Fetch one recording by MBID
    pub async fn fetch_by_mbid(&self, mbid: &str) -> Result<Option<MatchCandidate>, ProviderError> {
        debug!(mbid, "Fetching MusicBrainz recording");
        let url = format!("{}/recording/{}", self.base_url, mbid);
        let Some(body) = self
            .get(&url, &[("fmt", "json"), ("inc", "artists+releases+labels+isrcs")])
            .await?
        else {
            return Ok(None);
        };

        let recording: Recording =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Some(recording.into_candidate(Some(IdentifierMatch::Full))))
    }

    /// Search recordings by title and optional artist
    pub async fn search(
        &self,
        title: &str,
        artist: Option<&str>,
    ) -> Result<Vec<MatchCandidate>, ProviderError> {
        let query = search_query(title, artist);
        debug!(%query, "Searching MusicBrainz recordings");
        let url = format!("{}/recording", self.base_url);
        let Some(body) = self
            .get(&url, &[("query", query.as_str()), ("fmt", "json"), ("limit", SEARCH_LIMIT)])
            .await?
        else {
            return Ok(Vec::new());
        };
        parse_search(&body)
    }
}

fn parse_search(body: &str) -> Result<Vec<MatchCandidate>, ProviderError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(response
        .recordings
        .into_iter()
        .map(|r| r.into_candidate(None))
        .collect())
}

#[async_trait]
impl Provider for MusicBrainzProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Community
    }

    async fn lookup(
        &self,
        query: LookupQuery<'_>,
    ) -> Result<Option<ProviderResponse>, ProviderError> {
        if let Some(mbid) = query.known_id {
            if let Some(candidate) = self.fetch_by_mbid(mbid).await? {
                return Ok(Some(ProviderResponse::new(vec![candidate])));
            }
        }

        let candidates = self
            .search(&query.identity.title, query.identity.artist.as_deref())
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        Ok(Some(ProviderResponse::new(candidates)))
    }
}
