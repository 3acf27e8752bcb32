use std::time::Duration;

use humansize::{BINARY, format_size};
use tracing::info;

/// Aggregates for one statistics interval.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsSnapshot {
    Frames {
        frames: u64,
        alerts_sent: u64,
        avg_confidence: f32,
        min_confidence: f32,
        max_confidence: f32,
        buffer_bytes: usize,
        failed_frames: u64,
        overflows: u64,
    },
    /// Nothing was classified during the interval.
    NoFrames {
        interval: Duration,
        alerts_sent: u64,
        buffer_bytes: usize,
        failed_frames: u64,
        overflows: u64,
    },
}

/// Per-interval throughput and confidence counters.
#[derive(Debug)]
pub struct StatsReporter {
    interval: Duration,
    frames: u64,
    confidences: Vec<f32>,
    failed_frames: u64,
    overflows: u64,
    emissions: u64,
    last_snapshot: Option<StatsSnapshot>,
}

impl StatsReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            frames: 0,
            confidences: Vec::new(),
            failed_frames: 0,
            overflows: 0,
            emissions: 0,
            last_snapshot: None,
        }
    }

    pub fn record_frame(&mut self, confidence: f32) {
        self.frames += 1;
        self.confidences.push(confidence);
    }

    pub fn record_failure(&mut self) {
        self.failed_frames += 1;
    }

    pub fn record_overflow(&mut self) {
        self.overflows += 1;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Number of intervals emitted so far.
    pub fn emissions(&self) -> u64 {
        self.emissions
    }

    pub fn last_snapshot(&self) -> Option<&StatsSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Current aggregates. `alerts_sent` is cumulative and `buffer_bytes` a
    /// live reading, both supplied by the caller.
    pub fn snapshot(&self, alerts_sent: u64, buffer_bytes: usize) -> StatsSnapshot {
        if self.frames == 0 || self.confidences.is_empty() {
            return StatsSnapshot::NoFrames {
                interval: self.interval,
                alerts_sent,
                buffer_bytes,
                failed_frames: self.failed_frames,
                overflows: self.overflows,
            };
        }

        let sum: f32 = self.confidences.iter().sum();
        let min = self.confidences.iter().copied().fold(f32::INFINITY, f32::min);
        let max = self
            .confidences
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);

        StatsSnapshot::Frames {
            frames: self.frames,
            alerts_sent,
            avg_confidence: sum / self.confidences.len() as f32,
            min_confidence: min,
            max_confidence: max,
            buffer_bytes,
            failed_frames: self.failed_frames,
            overflows: self.overflows,
        }
    }

    /// Log the interval's statistics and reset the counters.
    pub fn emit(&mut self, alerts_sent: u64, buffer_bytes: usize) -> StatsSnapshot {
        let snapshot = self.snapshot(alerts_sent, buffer_bytes);
        match &snapshot {
            StatsSnapshot::Frames {
                frames,
                alerts_sent,
                avg_confidence,
                min_confidence,
                max_confidence,
                buffer_bytes,
                failed_frames,
                overflows,
            } => info!(
                frames,
                alerts_sent,
                failed_frames,
                overflows,
                "Stats: avg confidence {:.2}, min {:.2}, max {:.2}, buffer {}",
                avg_confidence,
                min_confidence,
                max_confidence,
                format_size(*buffer_bytes, BINARY)
            ),
            StatsSnapshot::NoFrames {
                interval,
                alerts_sent,
                buffer_bytes,
                failed_frames,
                overflows,
            } => info!(
                alerts_sent,
                failed_frames,
                overflows,
                buffer = %format_size(*buffer_bytes, BINARY),
                "No frames processed in the last {} seconds",
                interval.as_secs()
            ),
        }
        self.reset();
        self.emissions += 1;
        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    fn reset(&mut self) {
        self.frames = 0;
        self.confidences.clear();
        self.failed_frames = 0;
        self.overflows = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_confidences() {
        let mut stats = StatsReporter::new(Duration::from_secs(30));
        for c in [0.2, 0.8, 0.5] {
            stats.record_frame(c);
        }
        stats.record_failure();

        match stats.emit(4, 2048) {
            StatsSnapshot::Frames {
                frames,
                alerts_sent,
                avg_confidence,
                min_confidence,
                max_confidence,
                buffer_bytes,
                failed_frames,
                overflows,
            } => {
                assert_eq!(frames, 3);
                assert_eq!(alerts_sent, 4);
                assert!((avg_confidence - 0.5).abs() < 1e-6);
                assert_eq!(min_confidence, 0.2);
                assert_eq!(max_confidence, 0.8);
                assert_eq!(buffer_bytes, 2048);
                assert_eq!(failed_frames, 1);
                assert_eq!(overflows, 0);
            }
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[test]
    fn emits_no_frames_notice_and_resets() {
        let mut stats = StatsReporter::new(Duration::from_secs(30));
        stats.record_frame(0.4);
        stats.record_overflow();
        stats.emit(0, 0);

        assert_eq!(stats.frames(), 0);
        assert_eq!(stats.emissions(), 1);
        assert_eq!(
            stats.emit(2, 10),
            StatsSnapshot::NoFrames {
                interval: Duration::from_secs(30),
                alerts_sent: 2,
                buffer_bytes: 10,
                failed_frames: 0,
                overflows: 0,
            }
        );
        assert_eq!(stats.emissions(), 2);
        assert!(matches!(
            stats.last_snapshot(),
            Some(StatsSnapshot::NoFrames { alerts_sent: 2, .. })
        ));
    }
}
