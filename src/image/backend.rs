use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("backend payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("backend payload did not decode as an image: {0}")]
    Undecodable(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessedImage {
    pub data: String,
    pub mime_type: String,
    pub size: usize,
}

/// Remote image-processing service. Any error from it sends the pipeline
/// down the local normalization path.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn process(&self, raw: &[u8], mime_type: &str) -> Result<ProcessedImage, BackendError>;
}

pub struct HttpImageBackend {
    client: Client,
    endpoint: String,
}

impl HttpImageBackend {
    pub fn new(endpoint: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl ImageBackend for HttpImageBackend {
    async fn process(&self, raw: &[u8], mime_type: &str) -> Result<ProcessedImage, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", mime_type)
            .body(raw.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let processed: ProcessedImage = response.json().await?;
        log::debug!(
            "Backend processed image to {} bytes ({})",
            processed.size,
            processed.mime_type
        );
        Ok(processed)
    }
}
