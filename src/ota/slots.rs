//! Dual-slot firmware storage.
//!
//! The device exposes two flash banks. New images are only ever written
//! to the inactive slot; the active slot stays read-only except for the
//! atomic boot-pointer switch. The previously working image is never
//! erased or demoted until its successor is confirmed healthy.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Slot storage errors
#[derive(Error, Debug)]
pub enum SlotError {
    #[error("firmware image is empty")]
    ImageEmpty,
    #[error("firmware image of {size} bytes exceeds slot capacity of {capacity} bytes")]
    ImageTooLarge { size: u64, capacity: u64 },
    #[error("slot storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("boot pointer is corrupt: {0:?}")]
    CorruptBootPointer(String),
}

/// One of the two firmware banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    /// The opposite slot.
    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotId::A => "A",
            SlotId::B => "B",
        }
    }
}

/// Sanity-check a candidate image against the flashable region.
pub fn validate_image(image: &[u8], capacity: u64) -> Result<(), SlotError> {
    if image.is_empty() {
        return Err(SlotError::ImageEmpty);
    }
    if image.len() as u64 > capacity {
        return Err(SlotError::ImageTooLarge {
            size: image.len() as u64,
            capacity,
        });
    }
    Ok(())
}

/// The device's two firmware banks plus the bootloader's slot pointer.
pub trait SlotBank {
    /// Size of the flashable region per slot.
    fn capacity(&self) -> u64;

    /// Which slot the bootloader will boot next.
    fn boot_slot(&self) -> Result<SlotId, SlotError>;

    /// Write an image into a slot. Callers must only target the
    /// inactive slot.
    fn write_image(&mut self, slot: SlotId, image: &[u8]) -> Result<(), SlotError>;

    /// Read a slot's image back (boot-time and diagnostics).
    fn read_image(&self, slot: SlotId) -> Result<Vec<u8>, SlotError>;

    /// Atomically repoint the bootloader at a slot.
    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), SlotError>;
}

/// File-backed slot bank: two image files and a `boot` pointer file,
/// switched via temp-file + rename so the pointer is never ambiguous.
pub struct FileSlotBank {
    dir: PathBuf,
    capacity: u64,
}

impl FileSlotBank {
    /// Open (or initialize) a slot bank under `dir`. A missing boot
    /// pointer defaults to slot A.
    pub fn open(dir: impl Into<PathBuf>, capacity: u64) -> Result<Self, SlotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let bank = Self { dir, capacity };
        if !bank.pointer_path().exists() {
            bank.write_pointer(SlotId::A)?;
        }
        Ok(bank)
    }

    fn slot_path(&self, slot: SlotId) -> PathBuf {
        match slot {
            SlotId::A => self.dir.join("slot_a.bin"),
            SlotId::B => self.dir.join("slot_b.bin"),
        }
    }

    fn pointer_path(&self) -> PathBuf {
        self.dir.join("boot")
    }

    fn write_pointer(&self, slot: SlotId) -> Result<(), SlotError> {
        let temp = self.dir.join(".boot_new");
        fs::write(&temp, slot.as_str())?;
        fs::rename(&temp, self.pointer_path())?;
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), SlotError> {
        let temp = path.with_extension("tmp");
        fs::write(&temp, bytes)?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}

impl SlotBank for FileSlotBank {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn boot_slot(&self) -> Result<SlotId, SlotError> {
        let raw = fs::read_to_string(self.pointer_path())?;
        match raw.trim() {
            "A" => Ok(SlotId::A),
            "B" => Ok(SlotId::B),
            other => Err(SlotError::CorruptBootPointer(other.to_string())),
        }
    }

    fn write_image(&mut self, slot: SlotId, image: &[u8]) -> Result<(), SlotError> {
        validate_image(image, self.capacity)?;
        self.write_atomic(&self.slot_path(slot), image)?;
        info!(slot = slot.as_str(), bytes = image.len(), "image written to slot");
        Ok(())
    }

    fn read_image(&self, slot: SlotId) -> Result<Vec<u8>, SlotError> {
        Ok(fs::read(self.slot_path(slot))?)
    }

    fn set_boot_slot(&mut self, slot: SlotId) -> Result<(), SlotError> {
        self.write_pointer(slot)?;
        info!(slot = slot.as_str(), "boot pointer switched");
        Ok(())
    }
}
