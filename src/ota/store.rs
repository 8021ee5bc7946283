//! Named-blob fetch service.
//!
//! Release artifacts and the latest-release descriptor are published as
//! named blobs; the store is addressed only by identifier and provides no
//! integrity guarantee of its own (that comes from the envelope codec).

use reqwest::header::CONTENT_LENGTH;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Blob retrieval errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob {0:?} not found")]
    NotFound(String),
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
    #[error("incomplete transfer: expected {expected} bytes, received {received}")]
    IncompleteTransfer { expected: u64, received: u64 },
}

/// A remote store of named blobs: `get(identifier) -> bytes`.
pub trait BlobStore {
    fn get(&self, id: &str) -> impl std::future::Future<Output = Result<Vec<u8>, StoreError>> + Send;
}

impl<S: BlobStore + Send + Sync> BlobStore for std::sync::Arc<S> {
    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(id).await
    }
}

/// HTTP-backed blob store: blobs live at `<base_url>/<id>`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    /// Create a store client with the default per-request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(base_url, Duration::from_secs(60))
    }

    /// Create a store client with an explicit per-request timeout so a
    /// stalled transfer cannot hang the caller indefinitely.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent("FlashWave-Agent")
            .timeout(timeout)
            .build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { client, base_url })
    }

    fn blob_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }
}

impl BlobStore for HttpBlobStore {
    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.blob_url(id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let expected = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let mut body = Vec::with_capacity(expected.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            body.extend_from_slice(&chunk);
            if let Some(total) = expected {
                debug!(blob = id, received = body.len() as u64, total, "transfer progress");
            }
        }

        // A short body must never be passed off as the blob; the caller
        // restarts the transfer instead.
        if let Some(expected) = expected {
            let received = body.len() as u64;
            if received != expected {
                return Err(StoreError::IncompleteTransfer { expected, received });
            }
        }

        Ok(body)
    }
}

/// In-memory blob store used by tests and local dry runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fetch_count: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a blob.
    pub fn put(&self, id: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(id.into(), bytes);
    }

    /// Total number of successful `get` calls served.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }
}

impl BlobStore for MemoryBlobStore {
    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = self.blobs.lock().unwrap();
        match blobs.get(id) {
            Some(bytes) => {
                self.fetch_count.fetch_add(1, Ordering::Relaxed);
                Ok(bytes.clone())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}
