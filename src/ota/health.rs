//! Boot confirmation.
//!
//! After flashing, the device reboots into the new image and must reach
//! a healthy checkpoint within a bounded window. The main firmware
//! signals the checkpoint by writing a marker file; the agent's boot
//! guard polls for it and decides confirm-or-rollback.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of waiting for the post-flash health checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Checkpoint reached inside the window.
    Healthy,
    /// Window elapsed without the checkpoint firing.
    TimedOut,
}

/// Marker file the main firmware writes once it reaches its healthy
/// checkpoint (audio pipeline up, peripherals responding).
pub struct HealthMarker;

impl HealthMarker {
    const MARKER_NAME: &'static str = ".boot_healthy";

    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(Self::MARKER_NAME)
    }

    /// Signal a healthy boot.
    pub fn mark(data_dir: &Path) -> std::io::Result<()> {
        std::fs::write(Self::path(data_dir), "1")
    }

    pub fn is_set(data_dir: &Path) -> bool {
        Self::path(data_dir).exists()
    }

    /// Cleared before each confirmation window so a stale marker from
    /// the previous firmware cannot confirm the new one.
    pub fn clear(data_dir: &Path) -> std::io::Result<()> {
        let path = Self::path(data_dir);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Time-boxed wait for the health checkpoint.
pub struct BootGuard {
    window: Duration,
    poll_interval: Duration,
}

impl BootGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll for the marker until it appears or the window closes.
    pub async fn await_checkpoint(&self, data_dir: &Path) -> HealthVerdict {
        let deadline = Instant::now() + self.window;
        loop {
            if HealthMarker::is_set(data_dir) {
                debug!("health checkpoint reached");
                return HealthVerdict::Healthy;
            }
            if Instant::now() >= deadline {
                return HealthVerdict::TimedOut;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
