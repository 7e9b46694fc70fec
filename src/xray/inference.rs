//! AI inference client — one multipart POST to the external fracture
//! screening service.
//!
//! The timeout is deliberately long (120 s by default): slow model
//! inference is mitigated by waiting, never by retrying, so one upload
//! costs at most one inference run.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use super::types::Prediction;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Cannot reach the inference service at {0}")]
    Connection(String),
    #[error("Inference request timed out after {0}s")]
    Timeout(u64),
    #[error("Inference service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Failed to decode inference response: {0}")]
    ResponseParsing(String),
    #[error("Inference transport error: {0}")]
    Transport(String),
    #[error("Failed to read image for inference: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Submit a locally-readable image for screening.
    async fn infer(&self, image_path: &Path) -> Result<Prediction, InferenceError>;
}

/// HTTP client for the inference service.
pub struct HttpInferenceClient {
    endpoint: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpInferenceClient {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint: endpoint.to_string(),
            client,
            timeout_secs,
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, image_path: &Path) -> Result<Prediction, InferenceError> {
        let bytes = tokio::fs::read(image_path).await?;
        let file_name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "xray.png".to_string());
        let mime_type = mime_guess::from_path(image_path).first_or_octet_stream();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_type.as_ref())
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    InferenceError::Connection(self.endpoint.clone())
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| InferenceError::ResponseParsing(e.to_string()))
    }
}

/// Inference double for tests — returns a configured prediction, or fails
/// as if the service were unreachable.
pub struct MockInferenceClient {
    prediction: Prediction,
    unavailable: bool,
}

impl MockInferenceClient {
    pub fn new(prediction: Prediction) -> Self {
        Self {
            prediction,
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            prediction: Prediction::default(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn infer(&self, _image_path: &Path) -> Result<Prediction, InferenceError> {
        if self.unavailable {
            return Err(InferenceError::Connection("http://mock.inference".into()));
        }
        Ok(self.prediction.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_keeps_endpoint_and_timeout() {
        let client = HttpInferenceClient::new("http://localhost:5000/predict", 120);
        assert_eq!(client.endpoint, "http://localhost:5000/predict");
        assert_eq!(client.timeout_secs, 120);
    }

    #[tokio::test]
    async fn mock_client_returns_configured_prediction() {
        let prediction = Prediction {
            result: Some("Fracture detected".into()),
            confidence: Some(77.7),
            ..Prediction::default()
        };
        let client = MockInferenceClient::new(prediction);
        let out = client.infer(Path::new("/tmp/x.png")).await.unwrap();
        assert_eq!(out.result.as_deref(), Some("Fracture detected"));
    }

    #[tokio::test]
    async fn mock_unavailable_fails_with_connection_error() {
        let client = MockInferenceClient::unavailable();
        let err = client.infer(Path::new("/tmp/x.png")).await.unwrap_err();
        assert!(matches!(err, InferenceError::Connection(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_classifies_as_connection_failure() {
        // Nothing listens on this port; the connect error must map to the
        // user-actionable 503-equivalent variant, not a generic transport one.
        let client = HttpInferenceClient::new("http://127.0.0.1:9/predict", 2);
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"\x89PNG\r\n\x1a\nimage").unwrap();

        let err = client.infer(file.path()).await.unwrap_err();
        assert!(
            matches!(err, InferenceError::Connection(_) | InferenceError::Timeout(_)),
            "unexpected error: {err:?}"
        );
    }
}
