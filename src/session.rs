//! Per-session bookkeeping.
//!
//! A [`SessionRecord`] lives exactly as long as a session. It is owned and
//! mutated only by the engine's coordinating task; everything the outside
//! world sees is a [`SessionStatistics`] snapshot or, once the session has
//! ended, a [`SessionSummary`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::executor::ClickErrorKind;
use crate::history::{BoundedHistory, DEFAULT_HISTORY_CAPACITY};

/// A pause window; `end` is `None` while the pause is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseInterval {
    pub start: Instant,
    pub end: Option<Instant>,
}

impl PauseInterval {
    fn duration(&self, now: Instant) -> Duration {
        self.end
            .unwrap_or(now)
            .saturating_duration_since(self.start)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    MaxClicksReached,
    MaxDurationReached,
    ClickFailure,
    EmergencyStop,
}

#[derive(Debug)]
pub struct SessionRecord {
    started_at: Instant,
    started_wall: DateTime<Utc>,
    pauses: Vec<PauseInterval>,
    total_clicks: u64,
    successful_clicks: u64,
    failures: BTreeMap<ClickErrorKind, u64>,
    latencies: BoundedHistory<f64>,
    last_click_at: Option<Instant>,
    emergency_stopped: bool,
}

impl SessionRecord {
    pub fn new(started_at: Instant, started_wall: DateTime<Utc>) -> Self {
        Self {
            started_at,
            started_wall,
            pauses: Vec::new(),
            total_clicks: 0,
            successful_clicks: 0,
            failures: BTreeMap::new(),
            latencies: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
            last_click_at: None,
            emergency_stopped: false,
        }
    }

    /// Records one click attempt and how long the executor took.
    pub fn record_click(
        &mut self,
        at: Instant,
        latency: Duration,
        outcome: Result<(), ClickErrorKind>,
    ) {
        self.total_clicks += 1;
        match outcome {
            Ok(()) => self.successful_clicks += 1,
            Err(kind) => *self.failures.entry(kind).or_insert(0) += 1,
        }
        self.latencies.push(latency.as_secs_f64());
        self.last_click_at = Some(at);
    }

    /// Opens a pause window; ignored if one is already open.
    pub fn begin_pause(&mut self, at: Instant) {
        if self.is_paused() {
            return;
        }
        self.pauses.push(PauseInterval {
            start: at,
            end: None,
        });
    }

    /// Closes the open pause window, if any.
    pub fn end_pause(&mut self, at: Instant) {
        if let Some(open) = self.pauses.last_mut().filter(|p| p.end.is_none()) {
            open.end = Some(at.max(open.start));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pauses.last().is_some_and(|p| p.end.is_none())
    }

    pub fn mark_emergency_stopped(&mut self) {
        self.emergency_stopped = true;
    }

    pub fn total_clicks(&self) -> u64 {
        self.total_clicks
    }

    pub fn successful_clicks(&self) -> u64 {
        self.successful_clicks
    }

    pub fn pauses(&self) -> &[PauseInterval] {
        &self.pauses
    }

    /// Active time: wall time since start minus every pause window.
    pub fn duration(&self, now: Instant) -> Duration {
        let paused: Duration = self.pauses.iter().map(|p| p.duration(now)).sum();
        now.saturating_duration_since(self.started_at)
            .saturating_sub(paused)
    }

    /// Fraction of attempts that succeeded; 1.0 before the first attempt.
    pub fn success_rate(&self) -> f64 {
        if self.total_clicks == 0 {
            1.0
        } else {
            self.successful_clicks as f64 / self.total_clicks as f64
        }
    }

    pub fn mean_latency(&self) -> Duration {
        Duration::from_secs_f64(self.latencies.mean().unwrap_or(0.0).max(0.0))
    }

    pub fn clicks_per_second(&self, now: Instant) -> f64 {
        let active = self.duration(now).as_secs_f64();
        if active > 0.0 {
            self.total_clicks as f64 / active
        } else {
            0.0
        }
    }

    pub fn statistics(&self, now: Instant) -> SessionStatistics {
        SessionStatistics {
            started_at: self.started_wall,
            duration: self.duration(now),
            total_clicks: self.total_clicks,
            successful_clicks: self.successful_clicks,
            failed_clicks: self.total_clicks - self.successful_clicks,
            success_rate: self.success_rate(),
            mean_latency: self.mean_latency(),
            clicks_per_second: self.clicks_per_second(now),
            pause_count: self.pauses.len(),
            since_last_click: self
                .last_click_at
                .map(|at| now.saturating_duration_since(at)),
        }
    }

    /// Closes any open pause and turns the record into its final summary.
    pub fn finalize(mut self, now: Instant, reason: StopReason) -> SessionSummary {
        self.end_pause(now);
        let statistics = self.statistics(now);
        SessionSummary {
            statistics,
            failures: self.failures.into_iter().collect(),
            reason,
            emergency_stopped: self.emergency_stopped,
        }
    }
}

/// Derived, read-only view of a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub total_clicks: u64,
    pub successful_clicks: u64,
    pub failed_clicks: u64,
    pub success_rate: f64,
    pub mean_latency: Duration,
    pub clicks_per_second: f64,
    pub pause_count: usize,
    pub since_last_click: Option<Duration>,
}

/// What remains of a session after it ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub statistics: SessionStatistics,
    pub failures: Vec<(ClickErrorKind, u64)>,
    pub reason: StopReason,
    pub emergency_stopped: bool,
}

impl SessionSummary {
    pub fn total_clicks(&self) -> u64 {
        self.statistics.total_clicks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> (SessionRecord, Instant) {
        let start = Instant::now();
        (SessionRecord::new(start, Utc::now()), start)
    }

    #[test]
    fn duration_excludes_pauses() {
        let (mut record, start) = record();
        record.begin_pause(start + Duration::from_secs(2));
        record.end_pause(start + Duration::from_secs(5));
        assert_eq!(
            record.duration(start + Duration::from_secs(10)),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn open_pause_counts_until_now() {
        let (mut record, start) = record();
        record.begin_pause(start + Duration::from_secs(1));
        record.begin_pause(start + Duration::from_secs(2));
        assert!(record.is_paused());
        assert_eq!(record.pauses().len(), 1);
        assert_eq!(
            record.duration(start + Duration::from_secs(4)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn instant_pause_resume_leaves_duration_unchanged() {
        let (mut record, start) = record();
        let at = start + Duration::from_secs(3);
        let before = record.duration(at);
        record.begin_pause(at);
        record.end_pause(at);
        assert_eq!(record.duration(at), before);
    }

    #[test]
    fn click_accounting() {
        let (mut record, start) = record();
        let at = start + Duration::from_secs(1);
        record.record_click(at, Duration::from_millis(2), Ok(()));
        record.record_click(at, Duration::from_millis(4), Ok(()));
        record.record_click(at, Duration::from_millis(6), Err(ClickErrorKind::Timeout));
        record.record_click(at, Duration::from_millis(8), Ok(()));

        assert_eq!(record.total_clicks(), 4);
        assert_eq!(record.successful_clicks(), 3);
        assert_eq!(record.success_rate(), 0.75);
        let mean = record.mean_latency();
        assert!(mean.abs_diff(Duration::from_millis(5)) < Duration::from_micros(1));

        let now = start + Duration::from_secs(2);
        let stats = record.statistics(now);
        assert_eq!(stats.failed_clicks, 1);
        assert_eq!(stats.clicks_per_second, 2.0);
        assert_eq!(stats.since_last_click, Some(Duration::from_secs(1)));

        let summary = record.finalize(now, StopReason::Requested);
        assert_eq!(summary.failures, vec![(ClickErrorKind::Timeout, 1)]);
        assert_eq!(summary.total_clicks(), 4);
    }

    #[test]
    fn finalize_closes_open_pause() {
        let (mut record, start) = record();
        record.begin_pause(start + Duration::from_secs(1));
        record.mark_emergency_stopped();
        let summary = record.finalize(start + Duration::from_secs(3), StopReason::EmergencyStop);
        assert_eq!(summary.statistics.duration, Duration::from_secs(1));
        assert!(summary.emergency_stopped);
    }
}
