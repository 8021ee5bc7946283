//! Firmware version parsing and ordering.
//!
//! Versions are strict `major.minor.patch` triples of non-negative
//! integers. Ordering is component-wise, so `1.10.0` sorts after `1.9.0`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version {0:?}: expected \"major.minor.patch\"")]
    InvalidVersion(String),
}

/// A semantic firmware version (`major.minor.patch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// True when `self` sorts strictly after `other`.
    pub fn is_newer_than(&self, other: &FirmwareVersion) -> bool {
        self > other
    }
}

/// Compare two version strings: does `candidate` supersede `current`?
pub fn is_newer(candidate: &str, current: &str) -> Result<bool, VersionError> {
    let candidate: FirmwareVersion = candidate.parse()?;
    let current: FirmwareVersion = current.parse()?;
    Ok(candidate.is_newer_than(&current))
}

impl FromStr for FirmwareVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidVersion(s.to_string());
        let mut parts = s.split('.');
        let component = |p: Option<&str>| -> Result<u32, VersionError> {
            let p = p.ok_or_else(invalid)?;
            // Reject empty fields and stray signs/whitespace that u32::parse
            // would otherwise tolerate via trimming elsewhere.
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            p.parse().map_err(|_| invalid())
        };
        let major = component(parts.next())?;
        let minor = component(parts.next())?;
        let patch = component(parts.next())?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { major, minor, patch })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FirmwareVersion> for String {
    fn from(v: FirmwareVersion) -> String {
        v.to_string()
    }
}
