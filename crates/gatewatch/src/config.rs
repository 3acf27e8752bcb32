use std::time::Duration;

use url::Url;

use crate::error::MonitorError;

/// Boundary token used by the camera firmware this was built against.
pub const DEFAULT_BOUNDARY: &str = "--videoboundary";

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_SUPERVISION_CEILING: Duration = Duration::from_secs(1800);

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Convert a size in MiB (possibly fractional) to bytes.
pub fn mib_to_bytes(mib: f64) -> usize {
    if !mib.is_finite() || mib <= 0.0 {
        return 0;
    }
    (mib * BYTES_PER_MIB) as usize
}

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,
    /// Literal boundary token separating frames.
    pub boundary: String,
    /// Connect timeout and maximum silence between two reads.
    pub timeout: Duration,
    /// Receive buffer bound; exceeding it discards the whole buffer.
    pub max_buffer_bytes: usize,
    /// Sessions are closed and reopened after this long.
    pub refresh_interval: Duration,
}

impl StreamConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            boundary: DEFAULT_BOUNDARY.to_owned(),
            timeout: DEFAULT_STREAM_TIMEOUT,
            max_buffer_bytes: mib_to_bytes(10.0),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Rolling-window voting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionConfig {
    /// Positive frames required inside the window to call the state open.
    pub min_open_frames: usize,
    /// Age limit of the frames that take part in the vote.
    pub frame_window: Duration,
    /// Minimum gap between two alerts.
    pub alert_interval: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_open_frames: 3,
            frame_window: Duration::from_secs(10),
            alert_interval: Duration::from_secs(300),
        }
    }
}

/// Session retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Consecutive failed sessions tolerated before supervision terminates.
    pub limit: u32,
    /// Pause between a failed session and the next attempt.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            delay: Duration::from_secs(10),
        }
    }
}

/// Everything the supervisor needs to run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub stream: StreamConfig,
    pub decision: DecisionConfig,
    pub retry: RetryConfig,
    /// Statistics emission period.
    pub stats_interval: Duration,
    /// Optional wall-clock bound on the whole supervision run.
    pub supervision_ceiling: Option<Duration>,
}

impl MonitorConfig {
    pub fn new(stream: StreamConfig) -> Self {
        Self {
            stream,
            decision: DecisionConfig::default(),
            retry: RetryConfig::default(),
            stats_interval: Duration::from_secs(60),
            supervision_ceiling: Some(DEFAULT_SUPERVISION_CEILING),
        }
    }

    /// Reject settings the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !matches!(self.stream.url.scheme(), "http" | "https") {
            return Err(MonitorError::invalid_url(
                self.stream.url.as_str(),
                "only http and https streams are supported",
            ));
        }
        if self.stream.boundary.is_empty() {
            return Err(MonitorError::configuration("boundary must not be empty"));
        }
        if self.stream.max_buffer_bytes == 0 {
            return Err(MonitorError::configuration(
                "max_buffer_size_mb must be greater than zero",
            ));
        }
        if self.stream.timeout.is_zero() {
            return Err(MonitorError::configuration("stream_timeout must be non-zero"));
        }
        if self.stream.refresh_interval.is_zero() {
            return Err(MonitorError::configuration(
                "refresh_interval must be non-zero",
            ));
        }
        if self.decision.min_open_frames == 0 {
            return Err(MonitorError::configuration(
                "min_open_frames must be at least 1",
            ));
        }
        if self.decision.frame_window.is_zero() {
            return Err(MonitorError::configuration("frame_window must be non-zero"));
        }
        if self.retry.limit == 0 {
            return Err(MonitorError::configuration("retry_limit must be at least 1"));
        }
        if self.stats_interval.is_zero() {
            return Err(MonitorError::configuration("stats_interval must be non-zero"));
        }
        if self.supervision_ceiling.is_some_and(|c| c.is_zero()) {
            return Err(MonitorError::configuration(
                "supervision_ceiling must be non-zero when set",
            ));
        }
        Ok(())
    }
}
