use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("stream ended after {received} bytes")]
    StreamEnded { received: u64 },

    #[error("stream timed out: {reason}")]
    Timeout { reason: String },

    #[error("demultiplexer error: {source}")]
    Demux {
        #[from]
        source: mjpeg::MjpegError,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl MonitorError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether a fresh session has a realistic chance of succeeding.
    ///
    /// The supervisor retries every session failure regardless; this only
    /// drives log severity.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl { .. }
            | Self::Configuration { .. }
            | Self::Demux { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. }
            | Self::StreamEnded { .. }
            | Self::Timeout { .. }
            | Self::Io { .. } => true,
        }
    }
}
