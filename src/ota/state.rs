//! Persisted device update state.
//!
//! Survives reboots and power loss: written atomically (temp file +
//! rename) and mutated only by the update state machine.

use crate::ota::slots::SlotId;
use crate::ota::version::FirmwareVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// State persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to read state: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse state: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete update state persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateState {
    /// Version currently running (confirmed healthy).
    pub current_version: FirmwareVersion,
    /// Candidate staged to the inactive slot but not yet confirmed.
    pub pending_version: Option<FirmwareVersion>,
    /// Slot the pending candidate was written to. Compared against the
    /// actual boot pointer after reboot to tell a flashed candidate
    /// apart from one whose flash was interrupted.
    #[serde(default)]
    pub staged_slot: Option<SlotId>,
    /// Set only after a newly flashed image demonstrates a healthy boot.
    pub boot_confirmed: bool,
    /// Consecutive boots without confirmation (rollback trigger).
    pub failed_boot_count: u32,
    /// Failed boots tolerated before automatic rollback.
    pub max_failed_boots: u32,
    /// Last time the device checked the release descriptor.
    pub last_check: Option<DateTime<Utc>>,
}

impl UpdateState {
    /// Fresh state for a device's first boot at its factory version.
    pub fn first_boot(factory_version: FirmwareVersion, max_failed_boots: u32) -> Self {
        Self {
            current_version: factory_version,
            pending_version: None,
            staged_slot: None,
            boot_confirmed: true,
            failed_boot_count: 0,
            max_failed_boots,
            last_check: None,
        }
    }

    /// Load persisted state, or initialize it on first boot.
    pub fn load_or_init(
        path: &Path,
        factory_version: FirmwareVersion,
        max_failed_boots: u32,
    ) -> Result<Self, StateError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::first_boot(factory_version, max_failed_boots))
        }
    }

    /// Save state to disk atomically.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// An update was flashed and awaits its post-reboot health check.
    pub fn awaiting_confirmation(&self) -> bool {
        self.pending_version.is_some() && !self.boot_confirmed
    }

    /// Record a boot attempt while unconfirmed; true once the rollback
    /// threshold is reached.
    pub fn record_boot_attempt(&mut self) -> bool {
        self.failed_boot_count += 1;
        self.failed_boot_count >= self.max_failed_boots
    }

    /// Promote the pending candidate after a confirmed healthy boot.
    pub fn confirm(&mut self) {
        if let Some(version) = self.pending_version.take() {
            self.current_version = version;
        }
        self.staged_slot = None;
        self.boot_confirmed = true;
        self.failed_boot_count = 0;
    }

    /// Abandon the pending candidate; the running version is unchanged.
    pub fn abandon_pending(&mut self) {
        self.pending_version = None;
        self.staged_slot = None;
        self.boot_confirmed = true;
        self.failed_boot_count = 0;
    }
}
