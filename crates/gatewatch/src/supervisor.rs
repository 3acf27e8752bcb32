//! Session supervision.
//!
//! One session is one connection to the stream: open, demultiplex, classify
//! and decide frame by frame until the refresh interval elapses or the
//! connection fails. The supervisor runs sessions back to back, retrying
//! failures with a fixed delay until the consecutive-failure budget is spent.
//!
//! ```text
//!            +---------- refresh (attempts = 0) ---------+
//!            v                                           |
//! start -> connect -> [read -> demux -> classify -> decide]*
//!            ^               |
//!            |             error / EOF
//!            |               v
//!            +-- delay -- attempts += 1 --> attempts >= limit -> exhausted
//! ```
//!
//! Cancelling the shutdown token, or reaching the supervision ceiling, ends
//! supervision between frames.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mjpeg::{Boundary, FrameDemuxer, FrameRecord};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::alert::AlertDispatcher;
use crate::classifier::{Classification, Classifier};
use crate::config::MonitorConfig;
use crate::decision::{DecisionEngine, DoorState};
use crate::error::MonitorError;
use crate::health::HealthFlag;
use crate::source::StreamConnector;
use crate::stats::StatsReporter;

/// What to do after a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then start attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The consecutive-failure budget is spent.
    Terminate,
}

/// Consecutive session failure counter.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    limit: u32,
    delay: Duration,
}

impl RetryState {
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            limit,
            delay,
        }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.limit {
            RetryDecision::Terminate
        } else {
            RetryDecision::Retry {
                attempt: self.attempts,
                delay: self.delay,
            }
        }
    }

    /// Called when a session reaches its refresh point.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// How supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// The configured wall-clock ceiling elapsed.
    CeilingReached,
    /// The caller cancelled the shutdown token.
    Shutdown,
    /// `attempts` consecutive sessions failed.
    RetriesExhausted { attempts: u32 },
}

impl SupervisionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

enum SessionEnd {
    Refresh,
    Cancelled,
}

/// Runs stream sessions and owns every piece of per-process state.
pub struct StreamSupervisor {
    config: MonitorConfig,
    boundary: Boundary,
    connector: Arc<dyn StreamConnector>,
    classifier: Arc<dyn Classifier>,
    engine: DecisionEngine,
    dispatcher: AlertDispatcher,
    stats: StatsReporter,
    health: HealthFlag,
    retry: RetryState,
}

impl StreamSupervisor {
    pub fn new(
        config: MonitorConfig,
        connector: Arc<dyn StreamConnector>,
        classifier: Arc<dyn Classifier>,
        dispatcher: AlertDispatcher,
        health: HealthFlag,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let boundary = Boundary::new(config.stream.boundary.as_bytes())?;

        Ok(Self {
            boundary,
            connector,
            classifier,
            engine: DecisionEngine::new(config.decision),
            dispatcher,
            stats: StatsReporter::new(config.stats_interval),
            health,
            retry: RetryState::new(config.retry.limit, config.retry.delay),
            config,
        })
    }

    /// Supervise sessions until shutdown, the ceiling, or retry exhaustion.
    pub async fn run(&mut self, shutdown: CancellationToken) -> SupervisionOutcome {
        let token = shutdown.child_token();

        let ceiling_guard = self.config.supervision_ceiling.map(|ceiling| {
            let token = token.clone();
            tokio::spawn(async move {
                sleep(ceiling).await;
                token.cancel();
            })
        });

        info!(
            source = %self.connector.describe(),
            retry_limit = self.retry.limit(),
            ceiling_secs = ?self.config.supervision_ceiling.map(|c| c.as_secs()),
            "Starting stream supervision"
        );

        let outcome = self.supervise(&token).await;

        if let Some(guard) = ceiling_guard {
            guard.abort();
        }

        match outcome {
            SupervisionOutcome::Shutdown if !shutdown.is_cancelled() => {
                info!("Supervision ceiling reached, stopping");
                SupervisionOutcome::CeilingReached
            }
            other => other,
        }
    }

    async fn supervise(&mut self, token: &CancellationToken) -> SupervisionOutcome {
        let period = self.stats.interval();
        let mut stats_tick = interval_at(Instant::now() + period, period);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match self.run_session(token, &mut stats_tick).await {
                Ok(SessionEnd::Refresh) => {
                    if self.retry.attempts() > 0 {
                        debug!(attempts = self.retry.attempts(), "Retry counter reset");
                    }
                    self.retry.reset();
                }
                Ok(SessionEnd::Cancelled) => return SupervisionOutcome::Shutdown,
                Err(e) => {
                    self.health.set_unhealthy();
                    if e.is_retryable() {
                        warn!(error = %e, "Stream session failed");
                    } else {
                        error!(error = %e, "Stream session failed");
                    }

                    match self.retry.record_failure() {
                        RetryDecision::Terminate => {
                            error!(
                                attempts = self.retry.attempts(),
                                "Max retries reached ({}), giving up",
                                self.retry.limit()
                            );
                            return SupervisionOutcome::RetriesExhausted {
                                attempts: self.retry.attempts(),
                            };
                        }
                        RetryDecision::Retry { attempt, delay } => {
                            info!(
                                "Retrying in {}s ({}/{})",
                                delay.as_secs(),
                                attempt,
                                self.retry.limit()
                            );
                            tokio::select! {
                                _ = token.cancelled() => return SupervisionOutcome::Shutdown,
                                _ = sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    #[instrument(name = "session", skip_all, fields(attempt = self.retry.attempts()))]
    async fn run_session(
        &mut self,
        token: &CancellationToken,
        stats_tick: &mut Interval,
    ) -> Result<SessionEnd, MonitorError> {
        let mut demuxer = FrameDemuxer::new(
            self.boundary.clone(),
            self.config.stream.max_buffer_bytes,
        )?;

        let mut stream = tokio::select! {
            _ = token.cancelled() => return Ok(SessionEnd::Cancelled),
            stream = self.connector.connect() => stream?,
        };

        let refresh = sleep(self.config.stream.refresh_interval);
        tokio::pin!(refresh);
        let mut received: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => return Ok(SessionEnd::Cancelled),
                _ = &mut refresh => {
                    info!(received, "Refreshing stream connection");
                    return Ok(SessionEnd::Refresh);
                }
                _ = stats_tick.tick() => {
                    self.stats.emit(self.dispatcher.sent_count(), demuxer.buffered_len());
                }
                chunk = stream.next() => {
                    let chunk = match chunk {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => return Err(e),
                        None => return Err(MonitorError::StreamEnded { received }),
                    };
                    received += chunk.len() as u64;

                    if demuxer.push(&chunk).is_overflow() {
                        self.stats.record_overflow();
                        continue;
                    }

                    for frame in demuxer.drain() {
                        if token.is_cancelled() {
                            return Ok(SessionEnd::Cancelled);
                        }
                        self.process_frame(frame).await;
                    }
                }
            }
        }
    }

    async fn process_frame(&mut self, frame: FrameRecord) {
        match self.classifier.classify(frame.payload()).await {
            Ok(confidence) => {
                let decision = self
                    .engine
                    .evaluate(Classification::new(confidence, Instant::now()));
                self.stats.record_frame(confidence);

                if decision.state == DoorState::Open {
                    info!(
                        confidence,
                        open = decision.open_count,
                        window = decision.window_len,
                        "Door is {}",
                        decision.state
                    );
                } else {
                    debug!(
                        confidence,
                        open = decision.open_count,
                        window = decision.window_len,
                        "Door is {}",
                        decision.state
                    );
                }

                if decision.alert {
                    self.dispatcher.dispatch(confidence).await;
                }
                self.health.set_healthy();
            }
            Err(e) => {
                self.health.set_unhealthy();
                self.stats.record_failure();
                warn!(error = %e, bytes = frame.len(), "Error processing frame");
            }
        }
    }

    pub fn alerts_sent(&self) -> u64 {
        self.dispatcher.sent_count()
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn stats(&self) -> &StatsReporter {
        &self.stats
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn health(&self) -> &HealthFlag {
        &self.health
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_counts_consecutive_failures() {
        let delay = Duration::from_secs(10);
        let mut retry = RetryState::new(3, delay);

        assert_eq!(
            retry.record_failure(),
            RetryDecision::Retry { attempt: 1, delay }
        );
        assert_eq!(
            retry.record_failure(),
            RetryDecision::Retry { attempt: 2, delay }
        );
        assert_eq!(retry.record_failure(), RetryDecision::Terminate);
        assert_eq!(retry.attempts(), 3);
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut retry = RetryState::new(2, Duration::ZERO);
        retry.record_failure();
        retry.reset();
        assert!(matches!(retry.record_failure(), RetryDecision::Retry { .. }));
        assert_eq!(retry.record_failure(), RetryDecision::Terminate);
    }

    #[test]
    fn limit_of_one_terminates_immediately() {
        let mut retry = RetryState::new(1, Duration::ZERO);
        assert_eq!(retry.record_failure(), RetryDecision::Terminate);
    }

    #[test]
    fn only_exhaustion_is_a_failure() {
        assert!(SupervisionOutcome::RetriesExhausted { attempts: 5 }.is_failure());
        assert!(!SupervisionOutcome::CeilingReached.is_failure());
        assert!(!SupervisionOutcome::Shutdown.is_failure());
    }
}
