//! JSON configuration file.

use std::net::{AddrParseError, SocketAddr};
use std::path::Path;
use std::time::Duration;

use gatewatch_engine::config::{
    DEFAULT_BOUNDARY, DEFAULT_REFRESH_INTERVAL, DEFAULT_STREAM_TIMEOUT,
    DEFAULT_SUPERVISION_CEILING, mib_to_bytes,
};
use gatewatch_engine::{AlertTemplate, DecisionConfig, MonitorConfig, RetryConfig, StreamConfig};
use serde::Deserialize;
use url::Url;

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Timeout for alert relay requests.
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_refresh_interval() -> f64 {
    DEFAULT_REFRESH_INTERVAL.as_secs_f64()
}

fn default_supervision_ceiling() -> Option<f64> {
    Some(DEFAULT_SUPERVISION_CEILING.as_secs_f64())
}

fn default_boundary() -> String {
    DEFAULT_BOUNDARY.to_owned()
}

fn default_stream_timeout() -> f64 {
    DEFAULT_STREAM_TIMEOUT.as_secs_f64()
}

fn default_health_bind() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_classifier_timeout() -> f64 {
    10.0
}

/// On-disk configuration. Durations are seconds and may be fractional.
///
/// Unknown keys are ignored so that older files carrying transport settings
/// this build does not use still load.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub stream_url: String,
    pub alert_interval: f64,
    pub retry_limit: u32,
    pub retry_delay: f64,
    pub stats_interval: f64,
    pub min_open_frames: usize,
    pub frame_window: f64,
    pub max_buffer_size_mb: f64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: f64,
    /// `null` disables the ceiling.
    #[serde(default = "default_supervision_ceiling")]
    pub supervision_ceiling: Option<f64>,
    #[serde(default = "default_boundary")]
    pub boundary: String,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: f64,
    #[serde(default = "default_health_bind")]
    pub health_bind: String,

    pub classifier_url: String,
    #[serde(default = "default_classifier_timeout")]
    pub classifier_timeout: f64,

    pub email_from: String,
    pub email_to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
}

/// Validated, typed settings ready for wiring.
#[derive(Debug, Clone)]
pub struct Settings {
    pub monitor: MonitorConfig,
    pub alert: AlertTemplate,
    pub classifier_url: Url,
    pub classifier_timeout: Duration,
    /// `None` selects the log-only alert sink.
    pub alert_webhook_url: Option<Url>,
    pub health_bind: SocketAddr,
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, AppError> {
    let url = Url::parse(value).map_err(|e| AppError::invalid(key, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::invalid(key, "expected an http or https URL"));
    }
    Ok(url)
}

fn secs(key: &'static str, value: f64) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(value).map_err(|e| AppError::invalid(key, e.to_string()))
}

fn non_zero_secs(key: &'static str, value: f64) -> Result<Duration, AppError> {
    let duration = secs(key, value)?;
    if duration.is_zero() {
        return Err(AppError::invalid(key, "must be greater than zero"));
    }
    Ok(duration)
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AppError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn settings(&self) -> Result<Settings, AppError> {
        if !(self.max_buffer_size_mb.is_finite() && self.max_buffer_size_mb > 0.0) {
            return Err(AppError::invalid(
                "max_buffer_size_mb",
                "must be a positive number",
            ));
        }
        if self.retry_limit == 0 {
            return Err(AppError::invalid("retry_limit", "must be at least 1"));
        }
        if self.boundary.is_empty() {
            return Err(AppError::invalid("boundary", "must not be empty"));
        }

        let stream = StreamConfig {
            url: parse_url("stream_url", &self.stream_url)?,
            boundary: self.boundary.clone(),
            timeout: non_zero_secs("stream_timeout", self.stream_timeout)?,
            max_buffer_bytes: mib_to_bytes(self.max_buffer_size_mb),
            refresh_interval: non_zero_secs("refresh_interval", self.refresh_interval)?,
        };

        let monitor = MonitorConfig {
            stream,
            decision: DecisionConfig {
                min_open_frames: self.min_open_frames,
                frame_window: non_zero_secs("frame_window", self.frame_window)?,
                alert_interval: secs("alert_interval", self.alert_interval)?,
            },
            retry: RetryConfig {
                limit: self.retry_limit,
                delay: secs("retry_delay", self.retry_delay)?,
            },
            stats_interval: non_zero_secs("stats_interval", self.stats_interval)?,
            supervision_ceiling: self
                .supervision_ceiling
                .map(|secs| non_zero_secs("supervision_ceiling", secs))
                .transpose()?,
        };
        monitor.validate()?;

        let alert = AlertTemplate::new(
            self.email_from.clone(),
            &self.email_to,
            self.subject.clone(),
            self.body.clone(),
        );
        if alert.recipients.is_empty() {
            return Err(AppError::invalid("email_to", "no recipients"));
        }

        let health_bind = self
            .health_bind
            .parse()
            .map_err(|e: AddrParseError| AppError::invalid("health_bind", e.to_string()))?;

        Ok(Settings {
            monitor,
            alert,
            classifier_url: parse_url("classifier_url", &self.classifier_url)?,
            classifier_timeout: non_zero_secs("classifier_timeout", self.classifier_timeout)?,
            alert_webhook_url: self
                .alert_webhook_url
                .as_deref()
                .map(|url| parse_url("alert_webhook_url", url))
                .transpose()?,
            health_bind,
        })
    }
}
