//! Fetch & Integrity Pipeline
//!
//! Retrieves the latest-release descriptor and the referenced artifact
//! over an unreliable channel, with bounded exponential backoff, then
//! runs the artifact through the envelope codec to produce a validated
//! candidate image. Every failure here is recoverable: the device simply
//! keeps running its current firmware until the next cycle.

use crate::ota::descriptor::{DescriptorError, ReleaseDescriptor};
use crate::ota::envelope::{self, EnvelopeError, OtaKey};
use crate::ota::store::{BlobStore, StoreError};
use crate::ota::version::FirmwareVersion;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fetch pipeline errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("update service unavailable: {0}")]
    FetchUnavailable(String),
    #[error("blob {0:?} not found")]
    NotFound(String),
    #[error("incomplete transfer: expected {expected} bytes, received {received}")]
    IncompleteTransfer { expected: u64, received: u64 },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Bounded exponential backoff for transient network failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

/// Orchestrates descriptor fetch, version check, artifact fetch, and
/// envelope decryption against a generic blob store.
pub struct Fetcher<S: BlobStore> {
    store: S,
    descriptor_id: String,
    key: OtaKey,
    retry: RetryPolicy,
}

impl<S: BlobStore> Fetcher<S> {
    pub fn new(store: S, descriptor_id: impl Into<String>, key: OtaKey) -> Self {
        Self {
            store,
            descriptor_id: descriptor_id.into(),
            key,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch a blob, retrying transient failures and restarting short
    /// transfers. `NotFound` is not transient and fails immediately.
    async fn get_with_retry(&self, id: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_unavailable = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(blob = id, attempt, ?delay, "retrying fetch");
                tokio::time::sleep(delay).await;
            }
            match self.store.get(id).await {
                Ok(bytes) => return Ok(bytes),
                Err(StoreError::NotFound(id)) => return Err(FetchError::NotFound(id)),
                Err(StoreError::IncompleteTransfer { expected, received }) => {
                    warn!(blob = id, expected, received, "short transfer, restarting");
                    last_unavailable = Some(FetchError::IncompleteTransfer { expected, received });
                }
                Err(StoreError::Unavailable(reason)) => {
                    warn!(blob = id, attempt, %reason, "fetch attempt failed");
                    last_unavailable = Some(FetchError::FetchUnavailable(reason));
                }
            }
        }
        Err(last_unavailable
            .unwrap_or_else(|| FetchError::FetchUnavailable("no attempts made".to_string())))
    }

    /// Retrieve and parse the well-known latest-release descriptor.
    pub async fn fetch_latest_descriptor(&self) -> Result<ReleaseDescriptor, FetchError> {
        let record = self.get_with_retry(&self.descriptor_id).await?;
        Ok(ReleaseDescriptor::parse(&record)?)
    }

    /// Retrieve an encrypted release artifact by blob identifier.
    pub async fn fetch_artifact(&self, blob_id: &str) -> Result<Vec<u8>, FetchError> {
        self.get_with_retry(blob_id).await
    }

    /// Check for a release newer than `current` and produce its decrypted
    /// image. `Ok(None)` means "no update"; the artifact blob is not
    /// fetched in that case.
    pub async fn obtain_validated_image(
        &self,
        current: FirmwareVersion,
    ) -> Result<Option<(FirmwareVersion, Vec<u8>)>, FetchError> {
        self.obtain_image(current, false).await
    }

    /// Recovery variant: also accept the currently published version, so
    /// an operator can reinstall the running release.
    pub async fn obtain_reinstall_image(
        &self,
        current: FirmwareVersion,
    ) -> Result<Option<(FirmwareVersion, Vec<u8>)>, FetchError> {
        self.obtain_image(current, true).await
    }

    async fn obtain_image(
        &self,
        current: FirmwareVersion,
        allow_same: bool,
    ) -> Result<Option<(FirmwareVersion, Vec<u8>)>, FetchError> {
        let descriptor = self.fetch_latest_descriptor().await?;
        debug!(remote = %descriptor.version, %current, "descriptor fetched");

        let wanted = descriptor.version.is_newer_than(&current)
            || (allow_same && descriptor.version == current);
        if !wanted {
            return Ok(None);
        }

        let artifact = self.fetch_artifact(&descriptor.blob_id).await?;
        let image = envelope::decrypt(&artifact, &self.key)?;
        info!(
            version = %descriptor.version,
            artifact_bytes = artifact.len(),
            image_bytes = image.len(),
            "candidate image decrypted"
        );
        Ok(Some((descriptor.version, image)))
    }
}
