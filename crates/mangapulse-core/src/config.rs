//! MangaPulse configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MangaPulseError, Result};
use crate::types::ComparatorMode;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MangaPulseConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl MangaPulseConfig {
    /// Load config from the default path (~/.mangapulse/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MangaPulseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MangaPulseError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MangaPulseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the MangaPulse home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mangapulse")
    }

    /// Effective check interval in seconds, honoring diagnostic mode.
    pub fn check_interval_secs(&self) -> u64 {
        if self.scheduler.diagnostic {
            self.scheduler.diagnostic_interval_secs
        } else {
            self.scheduler.interval_secs
        }
    }
}

/// Cycle scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycles in normal operation.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds between cycles in diagnostic mode.
    #[serde(default = "default_diagnostic_interval_secs")]
    pub diagnostic_interval_secs: u64,
    /// Run on the fast diagnostic interval.
    #[serde(default)]
    pub diagnostic: bool,
    /// Fixed delay between consecutive fetches within one cycle
    /// (rate limiting toward the upstream chapter source).
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,
    /// Chapter label comparison mode.
    #[serde(default)]
    pub comparator: ComparatorMode,
}

fn default_interval_secs() -> u64 {
    3600
}
fn default_diagnostic_interval_secs() -> u64 {
    120
}
fn default_fetch_delay_ms() -> u64 {
    500
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            diagnostic_interval_secs: default_diagnostic_interval_secs(),
            diagnostic: false,
            fetch_delay_ms: default_fetch_delay_ms(),
            comparator: ComparatorMode::default(),
        }
    }
}

/// On-disk state locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ledger snapshot path (last observed chapter per title).
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
    /// Registered users file.
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
}

fn default_ledger_path() -> String {
    "~/.mangapulse/ledger.json".into()
}
fn default_registry_path() -> String {
    "~/.mangapulse/users.json".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            registry_path: default_registry_path(),
        }
    }
}

/// FCM push transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// FCM send endpoint.
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,
    /// Server key used in the `Authorization: key=...` header.
    #[serde(default)]
    pub server_key: String,
}

fn bool_true() -> bool {
    true
}
fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com/fcm/send".into()
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_fcm_endpoint(),
            server_key: String::new(),
        }
    }
}

/// Chapter source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// MangaDex API base URL.
    #[serde(default = "default_fetcher_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_fetcher_base_url() -> String {
    "https://api.mangadex.org".into()
}
fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: default_fetcher_base_url(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}
