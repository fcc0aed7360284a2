//! # cratedig common library
//!
//! Shared code for the cratedig enrichment workspace:
//! - Error and result types
//! - Configuration file resolution and TOML loading
//! - Event types (`EnrichEvent`) and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
