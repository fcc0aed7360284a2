//! Core data model shared by the enrichment components
//!
//! - `IdentificationRequest`: what the surrounding service hands us
//! - `TrackIdentityCandidate`: the normalized identity derived from a raw title
//! - `MatchCandidate`: one provider's proposed identity
//! - `DjSetContext`: circumstantial evidence from a DJ set around an occurrence

use serde::{Deserialize, Serialize};

// ============================================================================
// Fields
// ============================================================================

/// Metadata field that can be enriched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichField {
    Artist,
    Title,
    Label,
    Year,
    Genre,
}

impl EnrichField {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichField::Artist => "artist",
            EnrichField::Title => "title",
            EnrichField::Label => "label",
            EnrichField::Year => "year",
            EnrichField::Genre => "genre",
        }
    }

    /// Parse the string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "artist" => Some(EnrichField::Artist),
            "title" => Some(EnrichField::Title),
            "label" => Some(EnrichField::Label),
            "year" => Some(EnrichField::Year),
            "genre" => Some(EnrichField::Genre),
            _ => None,
        }
    }

    /// Every field, in the order the orchestrator resolves them
    pub fn all() -> [EnrichField; 5] {
        [
            EnrichField::Artist,
            EnrichField::Title,
            EnrichField::Label,
            EnrichField::Year,
            EnrichField::Genre,
        ]
    }
}

impl std::fmt::Display for EnrichField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request
// ============================================================================

/// Provider-specific identifier already known for a track (e.g. an MBID)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentifier {
    /// Provider name the identifier belongs to
    pub provider: String,
    /// Identifier value
    pub id: String,
}

/// Track identification request consumed from the surrounding service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentificationRequest {
    /// External track identifier (stable across retries)
    pub track_id: String,
    /// Raw title as scraped
    pub raw_title: String,
    /// Raw artist as scraped, if any
    pub raw_artist: Option<String>,
    /// Duration in seconds, if known
    pub duration_secs: Option<u32>,
    /// Release year, if known
    pub year: Option<i32>,
    /// Prior DJ-set sightings of this track
    #[serde(default)]
    pub contexts: Vec<DjSetContext>,
    /// Fields to enrich; empty means every field
    #[serde(default)]
    pub fields: Vec<EnrichField>,
    /// Identifiers already known for this track
    #[serde(default)]
    pub known_ids: Vec<ProviderIdentifier>,
    /// How many earlier attempts failed (0 on first try); ignored once the
    /// cooldown queue holds an entry for the track
    #[serde(default)]
    pub attempt: u32,
}

impl IdentificationRequest {
    /// Create a request for a raw title with no other evidence
    pub fn new(track_id: impl Into<String>, raw_title: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            raw_title: raw_title.into(),
            ..Default::default()
        }
    }

    /// Attach a raw artist
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.raw_artist = Some(artist.into());
        self
    }

    /// Attach DJ-set sightings
    pub fn with_contexts(mut self, contexts: Vec<DjSetContext>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Restrict enrichment to the given fields
    pub fn with_fields(mut self, fields: Vec<EnrichField>) -> Self {
        self.fields = fields;
        self
    }

    /// Fields to resolve, defaulting to all of them
    pub fn requested_fields(&self) -> Vec<EnrichField> {
        if self.fields.is_empty() {
            EnrichField::all().to_vec()
        } else {
            let mut fields = self.fields.clone();
            fields.sort();
            fields.dedup();
            fields
        }
    }

    /// Artist supplied by the caller, treating "ID"/"unknown" placeholders as absent
    pub fn known_artist(&self) -> Option<&str> {
        self.raw_artist
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty() && !is_placeholder_artist(a))
    }

    /// Identifier for a given provider, if supplied
    pub fn known_id_for(&self, provider: &str) -> Option<&str> {
        self.known_ids
            .iter()
            .find(|k| k.provider.eq_ignore_ascii_case(provider))
            .map(|k| k.id.as_str())
    }
}

/// Placeholder artist strings used in tracklists for unidentified music
pub fn is_placeholder_artist(artist: &str) -> bool {
    matches!(
        artist.trim().to_lowercase().as_str(),
        "id" | "unknown" | "unknown artist" | "?" | "??" | "n/a" | "tba"
    )
}

// ============================================================================
// Normalized identity
// ============================================================================

/// Normalized identity derived from a raw title and request metadata
///
/// Immutable once produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackIdentityCandidate {
    /// Display title with decorations removed
    pub title: String,
    /// Canonical search key (`normalize(title)`)
    pub search_key: String,
    /// Artist, or `None` when unknown
    pub artist: Option<String>,
    /// Duration in seconds
    pub duration_secs: Option<u32>,
    /// Release year
    pub year: Option<i32>,
    /// Label extracted from title decorations
    pub label_hint: Option<String>,
}

// ============================================================================
// Provider answers
// ============================================================================

/// How strongly a provider identifier matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierMatch {
    /// The identifier resolved to exactly this record
    Full,
    /// The identifier resolved to a related record (e.g. another release)
    Partial,
}

/// One provider's proposed identity for a track
///
/// Ranked and discarded after the orchestration decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Title as the provider spells it
    pub title: String,
    /// Credited artists, primary first
    pub artists: Vec<String>,
    /// Record label
    pub label: Option<String>,
    /// Duration in seconds
    pub duration_secs: Option<u32>,
    /// Release year
    pub year: Option<i32>,
    /// Genre or style
    pub genre: Option<String>,
    /// Provider name
    pub provider: String,
    /// Provider-side identifier
    pub provider_id: Option<String>,
    /// Raw relevance figure reported by the provider
    pub relevance: Option<f64>,
    /// Set when the provider resolved this record from a known identifier
    pub identifier_match: Option<IdentifierMatch>,
    /// External verification link (ISRC, store URL, ...)
    pub verification_link: Option<String>,
    /// Popularity evidence normalized to 0.0-1.0
    pub popularity: Option<f64>,
}

impl MatchCandidate {
    /// Primary credited artist
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }

    /// Value this candidate proposes for a field
    pub fn value_for(&self, field: EnrichField) -> Option<String> {
        match field {
            EnrichField::Artist => {
                if self.artists.is_empty() {
                    None
                } else {
                    Some(self.artists.join(", "))
                }
            }
            EnrichField::Title => Some(self.title.clone()).filter(|t| !t.trim().is_empty()),
            EnrichField::Label => self.label.clone(),
            EnrichField::Year => self.year.map(|y| y.to_string()),
            EnrichField::Genre => self.genre.clone(),
        }
    }
}

// ============================================================================
// DJ-set context
// ============================================================================

/// One track in a DJ set tracklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTrack {
    pub artist: String,
    pub title: String,
    pub label: Option<String>,
}

impl ContextTrack {
    pub fn new(artist: impl Into<String>, title: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            label: label.map(str::to_string),
        }
    }
}

/// The DJ who played a set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DjInfo {
    /// DJ or act name
    pub name: String,
    /// Labels the DJ owns or runs
    #[serde(default)]
    pub owned_labels: Vec<String>,
}

/// Ordered tracks surrounding one unresolved occurrence in a DJ set
///
/// Read-only input to the co-occurrence analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DjSetContext {
    /// Tracklist identifier
    pub set_id: String,
    /// Who played the set
    pub dj: DjInfo,
    /// Zero-based position of the unresolved track in the set
    pub position: usize,
    /// Number of tracks in the set
    pub set_length: usize,
    /// Tracks before the occurrence, nearest last
    #[serde(default)]
    pub preceding: Vec<ContextTrack>,
    /// Tracks after the occurrence, nearest first
    #[serde(default)]
    pub following: Vec<ContextTrack>,
}

impl DjSetContext {
    /// Track played immediately before the occurrence
    pub fn predecessor(&self) -> Option<&ContextTrack> {
        self.preceding.last()
    }

    /// Track played immediately after the occurrence
    pub fn successor(&self) -> Option<&ContextTrack> {
        self.following.first()
    }

    /// Position normalized to 0.0 (opener) - 1.0 (closer)
    pub fn normalized_position(&self) -> f64 {
        if self.set_length <= 1 {
            return 0.0;
        }
        (self.position as f64 / (self.set_length - 1) as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_fields_default_to_all() {
        let req = IdentificationRequest::new("t1", "Levels");
        assert_eq!(req.requested_fields().len(), 5);

        let req = req.with_fields(vec![EnrichField::Label, EnrichField::Artist, EnrichField::Label]);
        assert_eq!(req.requested_fields(), vec![EnrichField::Artist, EnrichField::Label]);
    }

    #[test]
    fn test_placeholder_artist_is_unknown() {
        let req = IdentificationRequest::new("t1", "Control [Viper]").with_artist("ID");
        assert_eq!(req.known_artist(), None);

        let req = IdentificationRequest::new("t1", "Levels").with_artist(" Avicii ");
        assert_eq!(req.known_artist(), Some("Avicii"));
    }

    #[test]
    fn test_candidate_field_values() {
        let candidate = MatchCandidate {
            title: "Control".to_string(),
            artists: vec!["Matrix".to_string(), "Futurebound".to_string()],
            label: Some("Viper Recordings".to_string()),
            year: Some(2012),
            ..Default::default()
        };
        assert_eq!(candidate.value_for(EnrichField::Artist).as_deref(), Some("Matrix, Futurebound"));
        assert_eq!(candidate.value_for(EnrichField::Year).as_deref(), Some("2012"));
        assert_eq!(candidate.value_for(EnrichField::Genre), None);
    }

    #[test]
    fn test_normalized_position() {
        let ctx = DjSetContext {
            set_id: "s".to_string(),
            dj: DjInfo::default(),
            position: 5,
            set_length: 11,
            preceding: vec![],
            following: vec![],
        };
        assert!((ctx.normalized_position() - 0.5).abs() < 1e-9);

        let single = DjSetContext { set_length: 1, position: 0, ..ctx };
        assert_eq!(single.normalized_position(), 0.0);
    }
}
