//! Title normalization and fuzzy matching
//!
//! - `title_parser`: decoration parsing (`parse`) and canonical keys (`normalize`)
//! - `fuzzy`: four-way similarity ensemble
//! - `matcher`: provider candidate ranking
//! - `vocabulary`: curated labels, remix keywords, abbreviations

pub mod fuzzy;
pub mod matcher;
pub mod title_parser;
pub mod vocabulary;

pub use fuzzy::{fuzzy_match, fuzzy_score, fuzzy_scores, FuzzyMatch, FuzzyScores, DEFAULT_FUZZY_THRESHOLD};
pub use matcher::{CandidateMatcher, RankedCandidate, Rejection, LABEL_MATCH_BONUS};
pub use title_parser::{normalize, parse, ParsedTitle, RemixType};

use crate::types::{IdentificationRequest, TrackIdentityCandidate};

/// Build the normalized identity for a request
///
/// The artist comes from the request (placeholders such as "ID" count as
/// unknown); the label hint comes from the title decorations.
pub fn identity_for(request: &IdentificationRequest) -> (ParsedTitle, TrackIdentityCandidate) {
    let parsed = parse(&request.raw_title);
    let identity = TrackIdentityCandidate {
        title: parsed.title.clone(),
        search_key: parsed.normalized.clone(),
        artist: request.known_artist().map(str::to_string),
        duration_secs: request.duration_secs,
        year: request.year,
        label_hint: parsed.label_hint.clone(),
    };
    (parsed, identity)
}
