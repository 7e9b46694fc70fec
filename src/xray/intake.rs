//! Image intake validation — local checks on the uploaded file, run before
//! any network call so a bad upload never costs an inference request.

use std::path::PathBuf;

use thiserror::Error;

/// Upload size ceiling (10 MiB).
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Accepted declared MIME types for an X-ray upload.
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg"];

/// An uploaded X-ray image staged in a request-owned temporary file.
/// The temp file itself is owned by the HTTP handler and removed on drop,
/// whichever way the request exits.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("No X-ray image was uploaded")]
    MissingFile,
    #[error("Temporary upload file no longer exists: {0}")]
    TempFileMissing(String),
    #[error("Unsupported image format '{0}': only PNG, JPG and JPEG are accepted")]
    UnsupportedFormat(String),
    #[error("Image is too large: {size_bytes} bytes (limit is 10 MiB)")]
    TooLarge { size_bytes: u64 },
}

/// Validate an uploaded image. Pure local check, no side effects.
pub fn validate_upload(upload: &UploadedImage) -> Result<(), IntakeError> {
    if !upload.path.exists() {
        return Err(IntakeError::TempFileMissing(
            upload.path.display().to_string(),
        ));
    }

    let mime = upload.mime_type.to_ascii_lowercase();
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(IntakeError::UnsupportedFormat(upload.mime_type.clone()));
    }

    if upload.size_bytes > MAX_IMAGE_BYTES {
        return Err(IntakeError::TooLarge {
            size_bytes: upload.size_bytes,
        });
    }

    Ok(())
}
