//! Release Descriptor Protocol
//!
//! The published `latest` record is a single text line,
//! `"<version>,<blob-id>"`, replaced wholesale on every release. The
//! format has no escaping, so delimiter characters are rejected at
//! publish time instead of corrupting the record.

use crate::ota::version::{FirmwareVersion, VersionError};
use thiserror::Error;

/// Descriptor protocol errors
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),
    #[error(transparent)]
    InvalidVersion(#[from] VersionError),
}

/// The current latest release and where to fetch its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub version: FirmwareVersion,
    pub blob_id: String,
}

impl ReleaseDescriptor {
    /// Build a descriptor for publication.
    ///
    /// Blob identifiers containing the record delimiter or line breaks
    /// cannot be represented and are rejected here.
    pub fn new(version: FirmwareVersion, blob_id: impl Into<String>) -> Result<Self, DescriptorError> {
        let blob_id = blob_id.into();
        if blob_id.trim().is_empty() {
            return Err(DescriptorError::MalformedDescriptor(
                "blob identifier is empty".to_string(),
            ));
        }
        if blob_id.contains(',') || blob_id.contains('\n') || blob_id.contains('\r') {
            return Err(DescriptorError::MalformedDescriptor(format!(
                "blob identifier {blob_id:?} contains a delimiter character"
            )));
        }
        Ok(Self { version, blob_id })
    }

    /// Serialize to the one-line wire record (no trailing newline).
    pub fn to_record(&self) -> String {
        format!("{},{}", self.version, self.blob_id)
    }

    /// Parse a fetched descriptor record.
    ///
    /// The record must split on exactly one comma into two non-empty
    /// trimmed fields; anything else means a client must not act on it.
    pub fn parse(record: &[u8]) -> Result<Self, DescriptorError> {
        let text = std::str::from_utf8(record)
            .map_err(|_| DescriptorError::MalformedDescriptor("record is not UTF-8".to_string()))?
            .trim();

        let mut fields = text.split(',');
        let (version, blob_id) = match (fields.next(), fields.next(), fields.next()) {
            (Some(v), Some(id), None) => (v.trim(), id.trim()),
            _ => {
                return Err(DescriptorError::MalformedDescriptor(format!(
                    "expected \"<version>,<blob-id>\", got {text:?}"
                )))
            }
        };
        if version.is_empty() || blob_id.is_empty() {
            return Err(DescriptorError::MalformedDescriptor(format!(
                "empty field in {text:?}"
            )));
        }

        Ok(Self {
            version: version.parse()?,
            blob_id: blob_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_parse_round_trip() {
        let descriptor =
            ReleaseDescriptor::new(FirmwareVersion::new(1, 4, 0), "1.4.0.enc").unwrap();
        let record = descriptor.to_record();
        assert_eq!(record, "1.4.0,1.4.0.enc");

        let parsed = ReleaseDescriptor::parse(record.as_bytes()).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        let parsed = ReleaseDescriptor::parse(b"2.0.1, fw-2.0.1.enc \n").unwrap();
        assert_eq!(parsed.version, FirmwareVersion::new(2, 0, 1));
        assert_eq!(parsed.blob_id, "fw-2.0.1.enc");
    }

    #[test]
    fn test_parse_rejects_malformed_records() {
        for bad in &[
            &b""[..],
            b"1.0.0",
            b"1.0.0,",
            b",blob",
            b"1.0.0,a,b",
            b"   ,   ",
            b"\xff\xfe,blob",
        ] {
            assert!(
                matches!(
                    ReleaseDescriptor::parse(bad),
                    Err(DescriptorError::MalformedDescriptor(_))
                ),
                "expected {bad:?} to be malformed"
            );
        }
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        assert!(matches!(
            ReleaseDescriptor::parse(b"1.0,blob"),
            Err(DescriptorError::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_publish_rejects_delimiter_in_blob_id() {
        let version = FirmwareVersion::new(1, 0, 0);
        assert!(ReleaseDescriptor::new(version, "a,b").is_err());
        assert!(ReleaseDescriptor::new(version, "a\nb").is_err());
        assert!(ReleaseDescriptor::new(version, "  ").is_err());
        assert!(ReleaseDescriptor::new(version, "ok-blob").is_ok());
    }
}
