//! Configuration types for Sheetkeeper.
//!
//! This module provides the [`HistoryConfig`] struct which holds the tunables
//! of the history core. Every timing and capacity parameter lives here and is
//! passed into the components explicitly, so tests can shrink delays or caps
//! without touching global state. Configuration is persisted as TOML
//! (typically at `~/.config/sheetkeeper/config.toml` on Unix systems).
//!
//! # Key Configuration Fields
//!
//! - `squash_delay_ms`: debounce window before buffered edits are committed
//! - `max_versions`: cap of the version log (oldest evicted first)
//! - `conflict_grace_ms`: how long `check_before_save` waits for other tabs
//! - `excluded_fields`: binary fields never stored in version snapshots
//!
//! # Example
//!
//! ```ignore
//! use sheetkeeper_core::config::HistoryConfig;
//!
//! let config = HistoryConfig {
//!     squash_delay_ms: 250,
//!     ..HistoryConfig::default()
//! };
//! assert_eq!(config.squash_delay().as_millis(), 250);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HistoryError, Result};

/// Default debounce delay for squashing edits.
pub const DEFAULT_SQUASH_DELAY_MS: u64 = 1000;

/// Default number of versions kept in the log.
pub const DEFAULT_MAX_VERSIONS: usize = 99;

/// `HistoryConfig` holds everything about the history core the embedder can tune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Debounce window in milliseconds. Edits arriving closer together than
    /// this are squashed into one version.
    pub squash_delay_ms: u64,

    /// Maximum number of versions kept. Older versions are evicted first.
    pub max_versions: usize,

    /// Grace window in milliseconds for `respond-latest` replies before a commit.
    pub conflict_grace_ms: u64,

    /// Upper bound for the best-effort flush on shutdown.
    pub teardown_timeout_ms: u64,

    /// Top-level snapshot fields holding large binary data (e.g. a portrait
    /// image). They are stripped before hashing and storing.
    pub excluded_fields: Vec<String>,

    /// Document type used to scope cross-tab messages.
    pub document_type: String,

    /// Location of the SQLite version log (CLI/native only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            squash_delay_ms: DEFAULT_SQUASH_DELAY_MS,
            max_versions: DEFAULT_MAX_VERSIONS,
            conflict_grace_ms: 150,
            teardown_timeout_ms: 500,
            excluded_fields: vec!["portrait".to_string()],
            document_type: "character".to_string(),
            database_path: None,
        }
    }
}

impl HistoryConfig {
    /// Debounce window as a `Duration`
    pub fn squash_delay(&self) -> Duration {
        Duration::from_millis(self.squash_delay_ms)
    }

    /// Conflict grace window as a `Duration`
    pub fn conflict_grace(&self) -> Duration {
        Duration::from_millis(self.conflict_grace_ms)
    }

    /// Shutdown flush bound as a `Duration`
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: HistoryConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load config from a path, returning the defaults if it can't be read.
    pub fn load_from_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default config ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

// ============================================================================
// Native-only implementation (not available in WASM)
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
impl HistoryConfig {
    /// Get the config file path (~/.config/sheetkeeper/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sheetkeeper").join("config.toml"))
    }

    /// Default location of the SQLite version log
    pub fn default_database_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("sheetkeeper").join("history.db"))
    }

    /// Load config from default location, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            return Self::load_from(&path);
        }

        Ok(HistoryConfig::default())
    }

    /// Save config to default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(HistoryError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// The configured database path, falling back to the platform data dir
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_database_path().ok_or(HistoryError::NoConfigDir),
        }
    }
}
