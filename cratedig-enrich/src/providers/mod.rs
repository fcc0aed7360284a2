//! Provider adapters
//!
//! - `musicbrainz`: MusicBrainz web service (rate limited)
//! - `static_provider`: fixed in-memory answers for tests and offline runs

pub mod musicbrainz;
pub mod static_provider;

pub use musicbrainz::MusicBrainzProvider;
pub use static_provider::StaticProvider;
