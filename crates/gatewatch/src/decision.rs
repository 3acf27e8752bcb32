//! Rolling-window voting over per-frame classifications.
//!
//! A single frame is too noisy to act on, so the engine keeps the outcomes of
//! the last `frame_window` and calls the monitored state open once enough of
//! them are positive. Alerts for the open state are throttled to one per
//! `alert_interval`.
//!
//! The only state carried between evaluations is the window contents and the
//! time of the last alert.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::classifier::Classification;
use crate::config::DecisionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorState {
    /// Enough positive frames in the window.
    Open,
    /// Not open, and the window holds at least `min_open_frames` frames.
    ClosedSufficient,
    /// Not open, but too few recent frames to be confident.
    ClosedInsufficient,
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorState::Open => write!(f, "OPEN"),
            DoorState::ClosedSufficient => write!(f, "CLOSED with sufficient frames"),
            DoorState::ClosedInsufficient => write!(f, "CLOSED with insufficient frames"),
        }
    }
}

/// Result of folding one classification into the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: DoorState,
    /// An alert should be dispatched for this frame.
    pub alert: bool,
    pub open_count: usize,
    pub window_len: usize,
    pub confidence: f32,
}

/// Time-bounded, time-ordered sequence of recent classifications.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    entries: VecDeque<Classification>,
    duration: Duration,
}

impl RollingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            duration,
        }
    }

    pub fn push(&mut self, result: Classification) {
        debug_assert!(
            self.entries
                .back()
                .is_none_or(|last| last.timestamp <= result.timestamp),
            "classifications must arrive in time order"
        );
        self.entries.push_back(result);
    }

    /// Drop every entry older than `now - duration`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.timestamp) > self.duration {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn positive_count(&self) -> usize {
        self.entries.iter().filter(|c| c.is_positive).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Classification> {
        self.entries.iter()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[derive(Debug)]
pub struct DecisionEngine {
    config: DecisionConfig,
    window: RollingWindow,
    last_alert: Option<Instant>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            window: RollingWindow::new(config.frame_window),
            config,
            last_alert: None,
        }
    }

    /// Fold a classification in, evaluated at the classification's timestamp.
    pub fn evaluate(&mut self, result: Classification) -> Decision {
        let now = result.timestamp;
        self.window.push(result);
        self.window.prune(now);

        let open_count = self.window.positive_count();
        let window_len = self.window.len();

        let state = if open_count >= self.config.min_open_frames.min(window_len) {
            DoorState::Open
        } else if window_len >= self.config.min_open_frames {
            DoorState::ClosedSufficient
        } else {
            DoorState::ClosedInsufficient
        };

        let alert = state == DoorState::Open && self.alert_due(now);
        if alert {
            self.last_alert = Some(now);
        }

        Decision {
            state,
            alert,
            open_count,
            window_len,
            confidence: result.confidence,
        }
    }

    fn alert_due(&self, now: Instant) -> bool {
        self.last_alert
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.alert_interval)
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_open_frames: usize, window_secs: u64, alert_secs: u64) -> DecisionConfig {
        DecisionConfig {
            min_open_frames,
            frame_window: Duration::from_secs(window_secs),
            alert_interval: Duration::from_secs(alert_secs),
        }
    }

    #[test]
    fn window_holds_exactly_recent_entries() {
        let start = Instant::now();
        let window_len = Duration::from_millis(2500);
        let mut window = RollingWindow::new(window_len);
        let mut recorded = Vec::new();

        for step in 0..40u64 {
            let now = start + Duration::from_millis(step * 300);
            let result = Classification::new(if step % 3 == 0 { 0.9 } else { 0.2 }, now);
            recorded.push(result);
            window.push(result);
            window.prune(now);

            let expected: Vec<_> = recorded
                .iter()
                .filter(|c| now.duration_since(c.timestamp) <= window_len)
                .collect();
            let actual: Vec<_> = window.iter().collect();
            assert_eq!(actual, expected, "window mismatch at step {step}");
        }
    }

    #[test]
    fn entry_exactly_at_window_edge_is_kept() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(5));
        window.push(Classification::new(0.9, start));
        window.prune(start + Duration::from_secs(5));
        assert_eq!(window.len(), 1);
        window.prune(start + Duration::from_millis(5001));
        assert!(window.is_empty());
    }

    #[test]
    fn states_follow_window_evidence() {
        let start = Instant::now();
        let mut engine = DecisionEngine::new(config(3, 60, 300));

        // one negative frame: min(3, 1) = 1 positive needed
        let d = engine.evaluate(Classification::new(0.1, start));
        assert_eq!(d.state, DoorState::ClosedInsufficient);

        engine.evaluate(Classification::new(0.1, start + Duration::from_secs(1)));
        let d = engine.evaluate(Classification::new(0.1, start + Duration::from_secs(2)));
        assert_eq!(d.state, DoorState::ClosedSufficient);
        assert_eq!(d.window_len, 3);
        assert_eq!(d.open_count, 0);
    }

    #[test]
    fn single_positive_frame_is_open_when_window_is_small() {
        let mut engine = DecisionEngine::new(config(3, 60, 300));
        let d = engine.evaluate(Classification::new(0.8, Instant::now()));
        assert_eq!(d.state, DoorState::Open);
        assert!(d.alert);
    }

    #[test]
    fn old_positives_stop_counting() {
        let start = Instant::now();
        let mut engine = DecisionEngine::new(config(2, 5, 300));
        engine.evaluate(Classification::new(0.9, start));
        engine.evaluate(Classification::new(0.9, start + Duration::from_secs(1)));

        let later = start + Duration::from_secs(20);
        let d = engine.evaluate(Classification::new(0.1, later));
        assert_eq!(d.window_len, 1);
        assert_eq!(d.open_count, 0);
        assert_eq!(d.state, DoorState::ClosedInsufficient);
    }

    #[test]
    fn alerts_throttled_to_one_per_interval() {
        let start = Instant::now();
        let interval = Duration::from_secs(60);
        let mut engine = DecisionEngine::new(config(1, 10, 60));

        let mut alerts = Vec::new();
        let mut t = Duration::ZERO;
        while t < interval * 3 {
            let now = start + t;
            if engine.evaluate(Classification::new(0.95, now)).alert {
                alerts.push(t);
            }
            t += Duration::from_millis(700);
        }

        assert_eq!(alerts.len(), 3);
        for pair in alerts.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[test]
    fn first_open_frame_after_interval_rearms() {
        let start = Instant::now();
        let mut engine = DecisionEngine::new(config(1, 1, 10));

        assert!(engine.evaluate(Classification::new(0.9, start)).alert);
        // closed for a while
        for s in 2..15 {
            let d = engine.evaluate(Classification::new(0.1, start + Duration::from_secs(s)));
            assert!(!d.alert);
        }
        let reopened = start + Duration::from_secs(15);
        let d = engine.evaluate(Classification::new(0.9, reopened));
        assert_eq!(d.state, DoorState::Open);
        assert!(d.alert);
        assert_eq!(engine.last_alert(), Some(reopened));
    }

    #[test]
    fn ten_frame_scenario_alerts_once() {
        let start = Instant::now();
        let mut engine = DecisionEngine::new(config(3, 60, 300));

        let mut first_open = None;
        let mut alerts = 0;
        for frame in 1..=10u64 {
            let confidence = if (3..=7).contains(&frame) { 0.9 } else { 0.1 };
            let d = engine.evaluate(Classification::new(
                confidence,
                start + Duration::from_secs(frame),
            ));
            if d.state == DoorState::Open && first_open.is_none() {
                first_open = Some(frame);
            }
            if d.alert {
                alerts += 1;
            }
        }

        assert_eq!(first_open, Some(5));
        assert_eq!(alerts, 1);
    }
}
