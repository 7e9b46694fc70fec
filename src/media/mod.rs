//! Artifact store boundary — the external object store that owns image
//! bytes. Diagnosis records keep only `{storage_id, url}` references.
//!
//! Deletion is best-effort at every call site: callers log failures and
//! move on, so a flaky store never blocks record cleanup.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;

use crate::models::StoredImage;

pub mod http_store;

pub use http_store::HttpMediaStore;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("Cannot reach the media store at {0}")]
    Connection(String),
    #[error("Media store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Failed to decode media store response: {0}")]
    ResponseParsing(String),
    #[error("Invalid image payload: {0}")]
    InvalidPayload(String),
    #[error("Media store transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload a local file into a logical folder.
    async fn upload_file(&self, path: &Path, folder: &str)
        -> Result<StoredImage, MediaStoreError>;

    /// Decode a base64 payload (raw or data URL), stage it as a temporary
    /// file, upload it, and remove the staging file whatever the outcome.
    async fn upload_base64(
        &self,
        data: &str,
        folder: &str,
    ) -> Result<StoredImage, MediaStoreError>;

    /// Delete a stored object by its identifier.
    async fn delete(&self, storage_id: &str) -> Result<(), MediaStoreError>;
}

/// Decode a base64 image payload to raw bytes.
///
/// Handles both `data:image/png;base64,...` and raw base64 strings.
pub(crate) fn decode_base64_image(data: &str) -> Result<Vec<u8>, MediaStoreError> {
    let encoded = match data.find(',') {
        Some(idx) => &data[idx + 1..],
        None => data,
    };

    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| MediaStoreError::InvalidPayload(format!("base64 decode failed: {e}")))
}

/// Detect file extension from magic bytes.
pub(crate) fn detect_extension(bytes: &[u8]) -> &'static str {
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        "jpg"
    } else if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        "png"
    } else {
        "bin"
    }
}

// ═══════════════════════════════════════════════════════════
// Mock store for tests
// ═══════════════════════════════════════════════════════════

/// In-memory store double. Records every upload and delete so tests can
/// assert on the pipeline's artifact traffic, with switchable failure
/// modes per operation.
#[derive(Default)]
pub struct MockMediaStore {
    counter: AtomicUsize,
    pub uploaded_folders: Mutex<Vec<String>>,
    pub deleted_ids: Mutex<Vec<String>>,
    fail_file_uploads: bool,
    fail_base64_uploads: bool,
    failing_delete_ids: Vec<String>,
}

impl MockMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `upload_file` call fails — exercises the fatal storage path.
    pub fn with_failing_file_uploads(mut self) -> Self {
        self.fail_file_uploads = true;
        self
    }

    /// Every `upload_base64` call fails — exercises the non-fatal
    /// annotated-image path.
    pub fn with_failing_base64_uploads(mut self) -> Self {
        self.fail_base64_uploads = true;
        self
    }

    /// Deleting the given id fails (but is still recorded as attempted).
    pub fn with_failing_delete(mut self, storage_id: &str) -> Self {
        self.failing_delete_ids.push(storage_id.to_string());
        self
    }

    fn stored(&self, folder: &str) -> StoredImage {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        StoredImage {
            storage_id: format!("{folder}/img-{n}"),
            url: format!("https://media.test/{folder}/img-{n}.png"),
        }
    }
}

#[async_trait]
impl MediaStore for MockMediaStore {
    async fn upload_file(
        &self,
        _path: &Path,
        folder: &str,
    ) -> Result<StoredImage, MediaStoreError> {
        if self.fail_file_uploads {
            return Err(MediaStoreError::Connection("mock store down".into()));
        }
        self.uploaded_folders.lock().unwrap().push(folder.to_string());
        Ok(self.stored(folder))
    }

    async fn upload_base64(
        &self,
        data: &str,
        folder: &str,
    ) -> Result<StoredImage, MediaStoreError> {
        if self.fail_base64_uploads {
            return Err(MediaStoreError::Connection("mock store down".into()));
        }
        decode_base64_image(data)?;
        self.uploaded_folders.lock().unwrap().push(folder.to_string());
        Ok(self.stored(folder))
    }

    async fn delete(&self, storage_id: &str) -> Result<(), MediaStoreError> {
        self.deleted_ids.lock().unwrap().push(storage_id.to_string());
        if self.failing_delete_ids.iter().any(|id| id == storage_id) {
            return Err(MediaStoreError::Http {
                status: 500,
                body: "mock delete failure".into(),
            });
        }
        Ok(())
    }
}
