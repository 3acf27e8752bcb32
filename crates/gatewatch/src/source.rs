//! Stream sources.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::StreamConfig;
use crate::error::MonitorError;
use crate::http::stream_client;

/// Raw network reads of one session.
pub type ByteStream = BoxStream<'static, Result<Bytes, MonitorError>>;

/// Opens a fresh connection to the frame source for each session.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<ByteStream, MonitorError>;

    /// Human readable source description for logs.
    fn describe(&self) -> String;
}

/// Multipart stream served over HTTP(S).
pub struct HttpStreamConnector {
    client: Client,
    url: Url,
}

impl HttpStreamConnector {
    pub fn new(config: &StreamConfig) -> Result<Self, MonitorError> {
        Ok(Self {
            client: stream_client(config.timeout)?,
            url: config.url.clone(),
        })
    }
}

fn map_read_error(e: reqwest::Error) -> MonitorError {
    if e.is_timeout() {
        MonitorError::Timeout {
            reason: e.to_string(),
        }
    } else {
        MonitorError::from(e)
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn connect(&self) -> Result<ByteStream, MonitorError> {
        info!(url = %self.url, "Opening stream");

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(map_read_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::http_status(status, self.url.as_str(), "connect"));
        }

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            debug!(content_type = ?content_type, "Stream content type");
        }

        Ok(response.bytes_stream().map(|r| r.map_err(map_read_error)).boxed())
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}
