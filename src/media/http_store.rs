//! HTTP media store client.
//!
//! Talks to the deployment's image-hosting service over its REST surface:
//! `POST {base}/upload` (multipart `file` + `folder`) and
//! `DELETE {base}/media/{storage_id}`. Credentials ride as a bearer token.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{decode_base64_image, detect_extension, MediaStore, MediaStoreError};
use crate::models::StoredImage;

pub struct HttpMediaStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpMediaStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::new();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        file_name: String,
        mime_type: &str,
        folder: &str,
    ) -> Result<StoredImage, MediaStoreError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_type)
            .map_err(|e| MediaStoreError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("folder", folder.to_string());

        let url = format!("{}/upload", self.base_url);
        let response = self
            .request(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaStoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| MediaStoreError::ResponseParsing(e.to_string()))?;

        Ok(StoredImage {
            storage_id: uploaded.id,
            url: uploaded.url,
        })
    }

    fn classify(&self, error: reqwest::Error) -> MediaStoreError {
        if error.is_connect() || error.is_timeout() {
            MediaStoreError::Connection(self.base_url.clone())
        } else {
            MediaStoreError::Transport(error.to_string())
        }
    }
}

/// Response body from `POST /upload`.
#[derive(Deserialize)]
struct UploadResponse {
    id: String,
    url: String,
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn upload_file(
        &self,
        path: &Path,
        folder: &str,
    ) -> Result<StoredImage, MediaStoreError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime_type = mime_guess::from_path(path).first_or_octet_stream();

        self.upload_bytes(bytes, file_name, mime_type.as_ref(), folder)
            .await
    }

    async fn upload_base64(
        &self,
        data: &str,
        folder: &str,
    ) -> Result<StoredImage, MediaStoreError> {
        let bytes = decode_base64_image(data)?;
        let extension = detect_extension(&bytes);

        // Stage the decoded bytes as a real file so the upload path is
        // identical to the on-disk one. The NamedTempFile is removed on
        // drop regardless of the upload outcome.
        let staging = tempfile::Builder::new()
            .prefix("annotated_")
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        tokio::fs::write(staging.path(), &bytes).await?;

        self.upload_file(staging.path(), folder).await
    }

    async fn delete(&self, storage_id: &str) -> Result<(), MediaStoreError> {
        let url = format!("{}/media/{}", self.base_url, storage_id);
        let response = self
            .request(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaStoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
