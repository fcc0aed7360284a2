//! Common error types for cratedig

use thiserror::Error;

/// Common result type for cratedig operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by every cratedig crate
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure in the cooldown or score tables
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure (config file, database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable or out-of-range configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown track or queue entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected request (empty title, bad threshold)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
