//! Update State Machine
//!
//! Drives the device-side sequence: check version, fetch, decrypt,
//! validate, write to the inactive slot, switch the boot pointer, and
//! confirm (or roll back) after reboot. One cycle in flight at a time;
//! re-entrant triggers are coalesced. No failure before staging touches
//! persisted state or either slot, so the worst outcome of a bad cycle
//! is "update skipped".

use crate::ota::fetch::Fetcher;
use crate::ota::slots::{self, SlotBank, SlotError, SlotId};
use crate::ota::state::{StateError, UpdateState};
use crate::ota::store::BlobStore;
use crate::ota::version::FirmwareVersion;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// State machine errors. Everything here is a post-staging storage
/// failure; pipeline failures surface as `CycleOutcome::Aborted`.
#[derive(Error, Debug)]
pub enum MachineError {
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Where the machine currently is in the update lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    CheckingVersion,
    Fetching,
    Validating,
    Staged,
    Flashing,
    PendingConfirmation,
    Confirmed,
    RolledBack,
}

/// Result of one update cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Remote version is not newer; nothing to do.
    NoUpdate,
    /// A cycle was already in flight; this trigger was coalesced.
    Busy,
    /// The cycle failed before staging; device state is untouched.
    Aborted { reason: String },
    /// New firmware is in the inactive slot and the bootloader points at
    /// it; reboot and confirm.
    StagedForReboot(FirmwareVersion),
}

/// What the machine found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// Normal boot of a confirmed image.
    Steady,
    /// First boots of a freshly flashed image; run the health check.
    AwaitingConfirmation { pending: FirmwareVersion },
    /// Too many unconfirmed boots; the boot pointer was reverted.
    RolledBack { abandoned: FirmwareVersion },
}

/// The device-side update engine.
pub struct UpdateMachine<S: BlobStore, B: SlotBank> {
    fetcher: Fetcher<S>,
    bank: B,
    state: UpdateState,
    state_path: PathBuf,
    phase: UpdatePhase,
}

impl<S: BlobStore, B: SlotBank> UpdateMachine<S, B> {
    /// Load persisted state and resume where the last boot left off.
    pub fn new(
        fetcher: Fetcher<S>,
        bank: B,
        state_path: PathBuf,
        factory_version: FirmwareVersion,
        max_failed_boots: u32,
    ) -> Result<Self, MachineError> {
        let state = UpdateState::load_or_init(&state_path, factory_version, max_failed_boots)?;
        let phase = if state.awaiting_confirmation() {
            UpdatePhase::PendingConfirmation
        } else {
            UpdatePhase::Idle
        };
        Ok(Self {
            fetcher,
            bank,
            state,
            state_path,
            phase,
        })
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    /// Startup bookkeeping: count the boot attempt of an unconfirmed
    /// image and revert the boot pointer once the threshold is hit.
    pub fn on_boot(&mut self) -> Result<BootOutcome, MachineError> {
        if !self.state.awaiting_confirmation() {
            self.phase = UpdatePhase::Idle;
            return Ok(BootOutcome::Steady);
        }

        // A candidate is on record; it only counts as a boot attempt if
        // its flash completed. When the bootloader still names another
        // slot, the write or pointer switch was interrupted and the
        // candidate never ran.
        let booted = self.bank.boot_slot()?;
        if self.state.staged_slot != Some(booted) {
            warn!(
                staged = ?self.state.staged_slot.map(SlotId::as_str),
                booted = booted.as_str(),
                "staged update never became bootable; discarding candidate"
            );
            self.state.abandon_pending();
            self.state.save(&self.state_path)?;
            self.phase = UpdatePhase::Idle;
            return Ok(BootOutcome::Steady);
        }

        let exhausted = self.state.record_boot_attempt();
        self.state.save(&self.state_path)?;

        if exhausted {
            warn!(
                attempts = self.state.failed_boot_count,
                "unconfirmed image failed to prove itself; rolling back"
            );
            let abandoned = self.revert_to_previous_slot()?;
            return Ok(BootOutcome::RolledBack { abandoned });
        }

        self.phase = UpdatePhase::PendingConfirmation;
        // awaiting_confirmation() guarantees the pending version exists
        let pending = self.state.pending_version.unwrap_or(self.state.current_version);
        Ok(BootOutcome::AwaitingConfirmation { pending })
    }

    /// Periodic trigger: look for a newer release and stage it.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, MachineError> {
        self.cycle(false).await
    }

    /// Manual recovery trigger: also reinstall the currently published
    /// version when the remote is not newer.
    pub async fn run_cycle_forced(&mut self) -> Result<CycleOutcome, MachineError> {
        self.cycle(true).await
    }

    async fn cycle(&mut self, force: bool) -> Result<CycleOutcome, MachineError> {
        if self.phase != UpdatePhase::Idle {
            debug!(phase = ?self.phase, "update trigger coalesced");
            return Ok(CycleOutcome::Busy);
        }

        self.phase = UpdatePhase::CheckingVersion;
        self.state.last_check = Some(Utc::now());
        let current = self.state.current_version;

        self.phase = UpdatePhase::Fetching;
        let fetched = if force {
            self.fetcher.obtain_reinstall_image(current).await
        } else {
            self.fetcher.obtain_validated_image(current).await
        };
        let (version, image) = match fetched {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                debug!(%current, "remote is not newer; no update");
                self.phase = UpdatePhase::Idle;
                return Ok(CycleOutcome::NoUpdate);
            }
            Err(e) => return Ok(self.abort_cycle(e.to_string())),
        };

        self.phase = UpdatePhase::Validating;
        if let Err(e) = slots::validate_image(&image, self.bank.capacity()) {
            return Ok(self.abort_cycle(e.to_string()));
        }

        let active = self.bank.boot_slot()?;
        let target = active.other();
        let digest = Sha256::digest(&image);

        // Candidate and its target slot recorded (and confirmation
        // cleared) before any flash write, so an interrupted flash is
        // detected on the next boot.
        self.state.pending_version = Some(version);
        self.state.staged_slot = Some(target);
        self.state.boot_confirmed = false;
        self.state.save(&self.state_path)?;

        // Slot write + pointer switch form the critical section: nothing
        // else may touch the slots until this completes or fails.
        self.phase = UpdatePhase::Staged;
        if let Err(e) = self.bank.write_image(target, &image) {
            self.recover_failed_flash()?;
            return Err(e.into());
        }
        self.phase = UpdatePhase::Flashing;
        if let Err(e) = self.bank.set_boot_slot(target) {
            self.recover_failed_flash()?;
            return Err(e.into());
        }

        self.phase = UpdatePhase::PendingConfirmation;
        info!(
            %version,
            slot = target.as_str(),
            sha256 = %hex::encode(digest),
            "update staged; reboot to apply"
        );
        Ok(CycleOutcome::StagedForReboot(version))
    }

    /// The post-reboot health checkpoint fired: promote the candidate.
    pub fn confirm_boot(&mut self) -> Result<FirmwareVersion, MachineError> {
        self.state.confirm();
        self.state.save(&self.state_path)?;
        self.phase = UpdatePhase::Confirmed;
        info!(version = %self.state.current_version, "boot confirmed; update complete");
        self.phase = UpdatePhase::Idle;
        Ok(self.state.current_version)
    }

    /// The health checkpoint never fired: revert to the previous slot.
    pub fn roll_back(&mut self) -> Result<BootOutcome, MachineError> {
        let abandoned = self.revert_to_previous_slot()?;
        Ok(BootOutcome::RolledBack { abandoned })
    }

    fn abort_cycle(&mut self, reason: String) -> CycleOutcome {
        warn!(%reason, "update cycle aborted; keeping current firmware");
        self.phase = UpdatePhase::Idle;
        CycleOutcome::Aborted { reason }
    }

    /// Point the bootloader back at the previous slot and abandon the
    /// candidate. The previous image was never erased, so this is safe.
    fn revert_to_previous_slot(&mut self) -> Result<FirmwareVersion, MachineError> {
        // Only switch while the pointer still names the staged slot; the
        // previous image lives in the other one.
        let booted = self.bank.boot_slot()?;
        if self.state.staged_slot == Some(booted) {
            self.bank.set_boot_slot(booted.other())?;
        }
        let abandoned = self.state.pending_version.unwrap_or(self.state.current_version);
        self.state.abandon_pending();
        self.state.save(&self.state_path)?;
        self.phase = UpdatePhase::RolledBack;
        info!(
            %abandoned,
            active = %self.state.current_version,
            "rolled back to previous firmware"
        );
        self.phase = UpdatePhase::Idle;
        Ok(abandoned)
    }

    /// A flash write or pointer switch failed before reboot. The boot
    /// pointer still names the active slot, so only the candidate record
    /// needs to be cleared.
    fn recover_failed_flash(&mut self) -> Result<(), MachineError> {
        self.state.abandon_pending();
        self.state.save(&self.state_path)?;
        self.phase = UpdatePhase::Idle;
        Ok(())
    }
}
