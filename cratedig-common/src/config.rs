//! Configuration file resolution and TOML loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CRATEDIG_CONFIG";

/// Logging section shared by every cratedig binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    pub level: String,
    /// Emit ANSI colors on the console
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

/// Configuration file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (`CRATEDIG_CONFIG`)
/// 3. Platform config directory (`<config_dir>/cratedig/config.toml`) if it exists
///
/// Returns `None` when no file applies; callers then run on built-in defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// `<config_dir>/cratedig/config.toml`, whether or not it exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cratedig").join("config.toml"))
}

/// Load a TOML document into `T`
///
/// A missing path yields `T::default()`. A path that was named explicitly but
/// cannot be read or parsed is an error rather than a silent fallback.
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        tracing::debug!("No configuration file, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let parsed = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(parsed)
}

/// Write a serializable configuration back to disk as TOML
pub fn write_toml<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/cratedig (or /var/lib/cratedig for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("cratedig"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cratedig"))
            .join("cratedig.db")
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("cratedig"))
            .unwrap_or_else(|| PathBuf::from("./cratedig_data"))
            .join("cratedig.db")
    }
}
