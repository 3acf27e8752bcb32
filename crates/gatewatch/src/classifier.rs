//! Frame classifier contract and the HTTP inference adapter.
//!
//! The engine only sees a confidence score in `[0, 1]`. Decoding, resizing
//! and channel normalisation belong to the adapter (for [`HttpClassifier`],
//! to the inference service behind it).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use crate::error::MonitorError;
use crate::http::request_client;

/// Scores strictly above this count as positive.
pub const POSITIVE_THRESHOLD: f32 = 0.5;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("frame is not a JPEG image ({len} bytes)")]
    NotJpeg { len: usize },

    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("classifier returned out-of-range confidence {0}")]
    OutOfRange(f32),
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub confidence: f32,
    pub is_positive: bool,
    pub timestamp: Instant,
}

impl Classification {
    pub fn new(confidence: f32, timestamp: Instant) -> Self {
        Self {
            confidence,
            is_positive: confidence > POSITIVE_THRESHOLD,
            timestamp,
        }
    }
}

/// A pure function from an encoded image to a confidence score.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &Bytes) -> Result<f32, ClassifierError>;
}

/// Reject scores the decision engine cannot interpret.
pub fn validate_confidence(confidence: f32) -> Result<f32, ClassifierError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ClassifierError::OutOfRange(confidence))
    }
}

pub fn is_jpeg(image: &[u8]) -> bool {
    image.starts_with(&JPEG_SOI)
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    confidence: f32,
}

/// Posts each frame as `multipart/form-data` (field `image`) to an inference
/// endpoint that answers `{"confidence": <float>}`.
pub struct HttpClassifier {
    client: Client,
    endpoint: Url,
}

impl HttpClassifier {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, MonitorError> {
        Ok(Self {
            client: request_client(timeout)?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    #[instrument(skip_all, level = "trace", fields(bytes = image.len()))]
    async fn classify(&self, image: &Bytes) -> Result<f32, ClassifierError> {
        if !is_jpeg(image) {
            return Err(ClassifierError::NotJpeg { len: image.len() });
        }

        let part = Part::stream_with_length(image.clone(), image.len() as u64)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status { status, body });
        }

        let parsed: ClassifyResponse = response.json().await?;
        debug!(confidence = parsed.confidence, "Classifier response");
        validate_confidence(parsed.confidence)
    }
}
