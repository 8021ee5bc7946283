//! FlashWave - encrypted over-the-air firmware updates
//!
//! A host-side release tool encrypts firmware images into the
//! `[IV || AES-256-CBC ciphertext]` envelope and publishes a one-line
//! release descriptor; the device-side agent polls for newer versions,
//! fetches and decrypts artifacts, stages them into the inactive flash
//! slot, and confirms or rolls back after reboot. The previously working
//! image is never discarded until its successor proves a healthy boot.

pub mod ota;
