use crate::playback::{Playlist, PlaylistError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

// Millisecond settings are compared against i64 timestamps
const MAX_MILLIS: u64 = i64::MAX as u64;

/// Tuning for snapshot replication between contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Key of the single shared slot holding the latest snapshot
    pub storage_key: String,
    /// Snapshots older than this are restored paused on load
    pub freshness_window_ms: u64,
    /// Grace given to incoming snapshots older than our own last change
    pub apply_tolerance_ms: u64,
    /// Position drift below this is left alone to avoid audible stutter
    pub drift_threshold_secs: f64,
    /// Minimum spacing of position heartbeat writes while playing
    pub heartbeat_interval_ms: u64,
    pub default_volume: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_key: "anniversaryMusicState".to_string(),
            freshness_window_ms: 5 * 60 * 1000,
            apply_tolerance_ms: 250,
            drift_threshold_secs: 2.0,
            heartbeat_interval_ms: 1000,
            default_volume: 0.3,
        }
    }
}

impl SyncConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn apply_tolerance(&self) -> Duration {
        Duration::from_millis(self.apply_tolerance_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Storage key cannot be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Heartbeat interval must be positive".to_string(),
            ));
        }
        if self.freshness_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "Freshness window must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("Freshness window", self.freshness_window_ms),
            ("Apply tolerance", self.apply_tolerance_ms),
            ("Heartbeat interval", self.heartbeat_interval_ms),
        ] {
            if value > MAX_MILLIS {
                return Err(ConfigError::Invalid(format!(
                    "{} of {}ms is out of range",
                    name, value
                )));
            }
        }
        if !self.drift_threshold_secs.is_finite() || self.drift_threshold_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "Drift threshold must be a non-negative number, got {}",
                self.drift_threshold_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(ConfigError::Invalid(format!(
                "Default volume must be within [0, 1], got {}",
                self.default_volume
            )));
        }
        Ok(())
    }
}

/// Application configuration
/// Loaded from ~/.tandem/config.json when present, then overridden by
/// TANDEM_* environment variables (a .env file is honoured).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    /// Ordered track URIs, identical in every context
    pub playlist: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }

        let mut config = match Self::default_config_path() {
            Some(path) if path.exists() => Self::from_json_file(&path)?,
            _ => {
                debug!("Config: no config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.sync.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.sync.validate()?;
        info!("Config: loaded {}", path.display());
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tandem").join("config.json"))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("TANDEM_STORAGE_KEY") {
            self.sync.storage_key = key;
        }
        if let Some(v) = lookup("TANDEM_FRESHNESS_WINDOW_MS") {
            self.sync.freshness_window_ms = parse_var("TANDEM_FRESHNESS_WINDOW_MS", &v)?;
        }
        if let Some(v) = lookup("TANDEM_APPLY_TOLERANCE_MS") {
            self.sync.apply_tolerance_ms = parse_var("TANDEM_APPLY_TOLERANCE_MS", &v)?;
        }
        if let Some(v) = lookup("TANDEM_DRIFT_THRESHOLD_SECS") {
            self.sync.drift_threshold_secs = parse_var("TANDEM_DRIFT_THRESHOLD_SECS", &v)?;
        }
        if let Some(v) = lookup("TANDEM_HEARTBEAT_INTERVAL_MS") {
            self.sync.heartbeat_interval_ms = parse_var("TANDEM_HEARTBEAT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("TANDEM_DEFAULT_VOLUME") {
            self.sync.default_volume = parse_var("TANDEM_DEFAULT_VOLUME", &v)?;
        }
        if let Some(v) = lookup("TANDEM_PLAYLIST") {
            self.playlist = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn playlist(&self) -> Result<Playlist, PlaylistError> {
        Playlist::new(self.playlist.iter().cloned())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value: {}", name, value)))
}
