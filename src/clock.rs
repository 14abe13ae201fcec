//! Time sources.
//!
//! Monotonic readings always come from `tokio::time::Instant`, so timers and
//! clocks agree with each other and tests can drive both with tokio's paused
//! clock. Wall-clock readings go through the [`Clock`] trait so a test can skew
//! them independently of the monotonic cadence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use tokio::time::Instant;

use crate::error::{CadenceError, Result};

/// Earliest calendar year a trustworthy wall clock may report.
pub const MIN_TRUSTED_YEAR: i32 = 2024;
/// Latest calendar year a trustworthy wall clock may report.
pub const MAX_TRUSTED_YEAR: i32 = 2100;

/// Capability for reading the current time.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic time, immune to wall-clock adjustments.
    fn now(&self) -> Instant;

    /// Calendar time as reported by the system.
    fn wall_now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        (**self).wall_now()
    }
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A wall clock pinned to tokio's monotonic clock plus an adjustable skew.
///
/// Under `#[tokio::test(start_paused = true)]` advancing tokio time advances
/// this clock's wall time by the same amount; [`ManualClock::skew`] simulates
/// the user or NTP moving the system clock.
#[derive(Debug, Clone)]
pub struct ManualClock {
    anchor: Instant,
    anchor_wall: DateTime<Utc>,
    skew: Arc<Mutex<chrono::Duration>>,
}

impl ManualClock {
    /// Creates a clock whose wall time reads `wall` right now.
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_wall: wall,
            skew: Arc::new(Mutex::new(chrono::Duration::zero())),
        }
    }

    /// Jumps the wall clock by `delta` (negative values move it backwards)
    /// without touching monotonic time.
    pub fn skew(&self, delta: chrono::Duration) {
        if let Ok(mut skew) = self.skew.lock() {
            *skew += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        let skew = self
            .skew
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + to_chrono(elapsed) + skew
    }
}

/// Rejects a wall-clock reading whose calendar year falls outside the trusted window.
pub fn validate_system_time(now: DateTime<Utc>) -> Result<()> {
    let year = now.year();
    if (MIN_TRUSTED_YEAR..=MAX_TRUSTED_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(CadenceError::UntrustedSystemClock { year })
    }
}

/// Converts a std duration into a chrono duration, saturating on overflow.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Converts a chrono duration into a std duration, clamping negatives to zero.
pub fn to_std(duration: chrono::Duration) -> Duration {
    duration.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trusted_year_window() {
        let ok = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert!(validate_system_time(ok).is_ok());

        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            validate_system_time(epoch),
            Err(CadenceError::UntrustedSystemClock { year: 1970 })
        ));

        let far = Utc.with_ymd_and_hms(2150, 1, 1, 0, 0, 0).unwrap();
        assert!(validate_system_time(far).is_err());
    }

    #[test]
    fn negative_chrono_durations_clamp_to_zero() {
        assert_eq!(to_std(chrono::Duration::milliseconds(-5)), Duration::ZERO);
        assert_eq!(
            to_std(chrono::Duration::milliseconds(5)),
            Duration::from_millis(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_clock_follows_tokio_time_and_skew() {
        let start = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(clock.wall_now(), start + chrono::Duration::seconds(2));

        clock.skew(chrono::Duration::seconds(-30));
        assert_eq!(clock.wall_now(), start - chrono::Duration::seconds(28));
    }
}
