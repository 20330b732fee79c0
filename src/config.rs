//! Configuration file parser for ~/.config/greeder/config.toml.
//!
//! The config file is optional and a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level configuration.
///
/// Any subset of keys may be given; missing keys take their default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file. `None` means `<config dir>/greeder.db`.
    pub db_path: Option<PathBuf>,

    /// Interval between refreshes in `--watch` mode, in minutes.
    pub refresh_interval_minutes: u64,

    /// Feeds fetched concurrently during a refresh.
    pub max_concurrent_fetches: usize,

    /// Per-request HTTP timeout.
    pub fetch_timeout_secs: u64,

    /// Default window for `--restore-days` when no value is given.
    pub restore_window_days: i64,

    /// Purge articles and tombstones older than this after a refresh.
    /// 0 disables the purge.
    pub purge_after_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            refresh_interval_minutes: 30,
            max_concurrent_fetches: 10,
            fetch_timeout_secs: 30,
            restore_window_days: 7,
            purge_after_days: 0,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "db_path",
        "refresh_interval_minutes",
        "max_concurrent_fetches",
        "fetch_timeout_secs",
        "restore_window_days",
        "purge_after_days",
    ];

    /// `~/.config/greeder`, or `None` when `HOME` is unset.
    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("greeder"))
    }

    /// Database path from the config, falling back to the config directory.
    pub fn resolved_db_path(&self, config_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir.join("greeder.db"))
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            max_concurrent_fetches = config.max_concurrent_fetches,
            restore_window_days = config.restore_window_days,
            "Loaded configuration"
        );
        Ok(config)
    }
}
