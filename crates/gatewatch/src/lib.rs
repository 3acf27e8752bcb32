//! Watches a multipart camera stream, classifies every frame and raises
//! throttled alerts when the monitored state stays open.
//!
//! The pieces are wired together by [`StreamSupervisor`]:
//!
//! - [`StreamConnector`] opens a session and yields raw reads,
//! - [`mjpeg::FrameDemuxer`] cuts those reads into JPEG frames,
//! - a [`Classifier`] scores each frame,
//! - the [`DecisionEngine`] votes over a rolling window and decides when to alert,
//! - the [`AlertDispatcher`] hands alerts to an [`AlertSink`].
//!
//! [`HealthFlag`] reflects whether the latest frame was processed, and
//! [`HealthServer`] exposes it over HTTP.

pub mod alert;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod error;
pub mod health;
pub mod http;
pub mod source;
pub mod stats;
pub mod supervisor;

pub use alert::{
    Alert, AlertDispatcher, AlertError, AlertSink, AlertTemplate, LogAlertSink, WebhookAlertSink,
};
pub use classifier::{Classification, Classifier, ClassifierError, HttpClassifier};
pub use config::{DecisionConfig, MonitorConfig, RetryConfig, StreamConfig};
pub use decision::{Decision, DecisionEngine, DoorState, RollingWindow};
pub use error::MonitorError;
pub use health::{HealthFlag, HealthServer};
pub use source::{ByteStream, HttpStreamConnector, StreamConnector};
pub use stats::{StatsReporter, StatsSnapshot};
pub use supervisor::{RetryDecision, RetryState, StreamSupervisor, SupervisionOutcome};
