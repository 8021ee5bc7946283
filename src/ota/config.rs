//! Agent configuration.
//!
//! Loaded from `flashwave.config.json`. The update key is never part of
//! the config file itself; the config only names the provisioned key
//! file, and the key is validated (and weak keys refused) at load time.

use crate::ota::envelope::{EnvelopeError, OtaKey};
use crate::ota::version::FirmwareVersion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("update key rejected: {0}")]
    KeyError(#[from] EnvelopeError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Version baked into the factory image; used only on first boot.
    pub factory_version: FirmwareVersion,
    /// Base URL of the blob store hosting descriptor and artifacts.
    pub store_url: String,
    /// Identifier of the well-known latest-release descriptor blob.
    #[serde(default = "default_descriptor_id")]
    pub descriptor_id: String,
    /// Hex-encoded 32-byte pre-shared key, provisioned out of band.
    pub key_file: PathBuf,
    /// Where update state, slots, and the health marker live.
    pub data_dir: PathBuf,
    /// Flashable-region capacity per slot, in bytes.
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: u64,
    /// Seconds between periodic update checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Seconds a freshly booted image gets to reach its checkpoint.
    #[serde(default = "default_confirm_window")]
    pub confirm_window_secs: u64,
    /// Per-request timeout for blob transfers.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Unconfirmed boots tolerated before automatic rollback.
    #[serde(default = "default_max_failed_boots")]
    pub max_failed_boots: u32,
}

fn default_descriptor_id() -> String {
    "latest.txt".to_string()
}

fn default_slot_capacity() -> u64 {
    4 * 1024 * 1024
}

fn default_check_interval() -> u64 {
    3600
}

fn default_confirm_window() -> u64 {
    90
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_max_failed_boots() -> u32 {
    3
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save atomically so a crash mid-write cannot truncate the config.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        let temp = path.with_extension("tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }

    /// Read and validate the provisioned update key.
    pub fn load_key(&self) -> Result<OtaKey, ConfigError> {
        let hex = std::fs::read_to_string(&self.key_file)?;
        let key = OtaKey::from_hex(&hex)?;
        key.ensure_strong()?;
        Ok(key)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.data_dir.join("slots")
    }
}
