//! Configuration loading for the offline engine
//!
//! Settings are read from (in order of priority):
//! 1. Environment variables (`AGROMARKET_API_URL`, `AGROMARKET_DATA_DIR`)
//! 2. JSON file (~/.config/agromarket/offline.json)
//! 3. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::network::ProbeConfig;

/// Config filename in the AgroMarket config directory
pub const CONFIG_FILE: &str = "offline.json";

/// SQLite database filename within the data directory
const DATABASE_FILE: &str = "offline.sqlite";

/// Attachment directory within the data directory
const BLOB_DIR: &str = "blobs";

const API_URL_VAR: &str = "AGROMARKET_API_URL";
const DATA_DIR_VAR: &str = "AGROMARKET_DATA_DIR";

/// Background connectivity probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// host:port to connect to
    pub address: String,
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

fn default_probe_interval() -> u64 {
    15
}

fn default_probe_timeout() -> u64 {
    3000
}

impl ProbeSettings {
    pub fn to_probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            address: self.address.clone(),
            interval: Duration::from_secs(self.interval_secs.max(1)),
            timeout: Duration::from_millis(self.timeout_ms.max(1)),
        }
    }
}

/// Settings for [`crate::SyncEngine::open`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    pub api_base_url: String,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
    /// Attempts before a queued mutation is marked failed
    pub max_retries: u32,
    /// Without a probe the engine assumes it is online and relies on
    /// [`crate::NetworkMonitor::report`] for changes
    pub probe: Option<ProbeSettings>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            data_dir: None,
            max_retries: 3,
            probe: None,
        }
    }
}

impl OfflineConfig {
    /// Load the config file if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config = if config::config_exists(CONFIG_FILE) {
            config::load_json(CONFIG_FILE)?
        } else {
            Self::default()
        };
        Ok(config.apply_overrides(|name| std::env::var(name).ok()))
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(API_URL_VAR).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(dir) = lookup(DATA_DIR_VAR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Save to the config directory
    pub fn save(&self) -> Result<()> {
        config::save_json(CONFIG_FILE, self)
    }

    /// Directory holding the database and attachments
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => config::data_dir().context("Could not determine data directory"),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join(DATABASE_FILE))
    }

    pub fn blob_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join(BLOB_DIR))
    }
}
