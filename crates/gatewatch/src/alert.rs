//! Alert assembly and delivery.
//!
//! The transport is behind [`AlertSink`], a `deliver(subject, body,
//! recipients)` capability. Delivery failures are logged and counted by the
//! [`AlertDispatcher`]; they are never retried and never end a session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::error::MonitorError;
use crate::http::request_client;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("alert request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("alert relay returned HTTP {status}")]
    Status { status: StatusCode },
}

/// Split a `;` separated recipient list, trimming whitespace and dropping
/// empty entries.
pub fn parse_recipients(list: &str) -> Vec<String> {
    list.split(';')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A fully assembled notification.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub from: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Confidence of the frame that triggered the alert.
    pub confidence: f32,
    pub raised_at: DateTime<Utc>,
}

/// Static parts of every alert, taken from configuration.
#[derive(Debug, Clone)]
pub struct AlertTemplate {
    pub from: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl AlertTemplate {
    /// `to` is the raw `;` separated recipient list.
    pub fn new(
        from: impl Into<String>,
        to: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            recipients: parse_recipients(to),
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn render(&self, confidence: f32) -> Alert {
        Alert {
            from: self.from.clone(),
            recipients: self.recipients.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            confidence,
            raised_at: Utc::now(),
        }
    }
}

/// Delivery capability for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short transport name used in logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Hands alerts to a sink and keeps the cumulative delivery counters.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    template: AlertTemplate,
    sent: u64,
    failed: u64,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, template: AlertTemplate) -> Self {
        Self {
            sink,
            template,
            sent: 0,
            failed: 0,
        }
    }

    /// Deliver one alert. Returns whether delivery succeeded.
    pub async fn dispatch(&mut self, confidence: f32) -> bool {
        let alert = self.template.render(confidence);
        let result = if alert.recipients.is_empty() {
            Err(AlertError::NoRecipients)
        } else {
            self.sink.deliver(&alert).await
        };

        match result {
            Ok(()) => {
                self.sent += 1;
                info!(
                    sink = self.sink.name(),
                    recipients = %alert.recipients.join(", "),
                    "Alert sent"
                );
                true
            }
            Err(e) => {
                self.failed += 1;
                warn!(sink = self.sink.name(), error = %e, "Failed to send alert");
                false
            }
        }
    }

    /// Alerts delivered since start-up.
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    pub fn template(&self) -> &AlertTemplate {
        &self.template
    }
}

/// Posts alerts as JSON to a mail relay or generic webhook.
pub struct WebhookAlertSink {
    client: Client,
    url: Url,
}

impl WebhookAlertSink {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, MonitorError> {
        Ok(Self {
            client: request_client(timeout)?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(alert)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status { status });
        }
        Ok(())
    }
}

/// Writes alerts to the log only. Used when no relay is configured.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        warn!(
            from = %alert.from,
            to = %alert.recipients.join(", "),
            subject = %alert.subject,
            confidence = alert.confidence,
            "ALERT: {}",
            alert.body
        );
        Ok(())
    }
}
