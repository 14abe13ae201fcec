//! Low-jitter periodic and one-shot timers on the monotonic clock.
//!
//! Each running [`MonotonicIntervalTimer`] owns one spawned tokio task (its
//! timer context). The task sleeps until the next ideal deadline, measures
//! how far the actual firing strayed from the target period, and hands a
//! [`Tick`] to its [`TickListener`]. The listener is invoked synchronously on
//! the timer task, so ticks from one timer never overlap.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::{CadenceError, Result};
use crate::history::{BoundedHistory, DEFAULT_HISTORY_CAPACITY};

/// Firing errors above this are logged for diagnostics.
pub const TICK_WARNING_THRESHOLD: Duration = Duration::from_millis(5);
/// Mean error budget for [`TimingAccuracyStats::within_tolerance`].
pub const MAX_MEAN_ERROR: Duration = Duration::from_millis(2);
/// Peak error budget for [`TimingAccuracyStats::within_tolerance`].
pub const MAX_PEAK_ERROR: Duration = Duration::from_millis(10);
/// Smallest leeway a timer is granted regardless of interval.
pub const MIN_TOLERANCE: Duration = Duration::from_micros(100);

/// One firing of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 1-based firing count since the timer was started.
    pub sequence: u64,
    pub scheduled_at: Instant,
    pub fired_at: Instant,
    /// Target period in effect for this firing.
    pub interval: Duration,
    /// Absolute deviation of the observed period from `interval`.
    pub error: Duration,
}

/// Receives ticks on the timer's own task.
///
/// Implementations should return quickly; long work belongs on another task.
pub trait TickListener: Send + 'static {
    fn on_tick(&mut self, tick: Tick);
}

impl<F> TickListener for F
where
    F: FnMut(Tick) + Send + 'static,
{
    fn on_tick(&mut self, tick: Tick) {
        self(tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    Repeating,
    OneShot,
}

/// Accuracy of a timer over its most recent firings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingAccuracyStats {
    pub mean_error: Duration,
    pub max_error: Duration,
    pub std_dev: Duration,
    pub sample_count: usize,
    pub target_interval: Duration,
    /// Firings whose error exceeded the timer's leeway.
    pub late_ticks: u64,
    pub within_tolerance: bool,
}

impl Default for TimingAccuracyStats {
    fn default() -> Self {
        Self {
            mean_error: Duration::ZERO,
            max_error: Duration::ZERO,
            std_dev: Duration::ZERO,
            sample_count: 0,
            target_interval: Duration::ZERO,
            late_ticks: 0,
            within_tolerance: true,
        }
    }
}

/// Leeway granted to a timer: 1% of the interval, floored at [`MIN_TOLERANCE`].
pub fn tolerance_for(interval: Duration) -> Duration {
    (interval / 100).max(MIN_TOLERANCE)
}

#[derive(Debug, Clone, Copy)]
struct Control {
    paused: bool,
    interval: Duration,
}

struct ActiveRun {
    mode: TimerMode,
    control: watch::Sender<Control>,
    task: JoinHandle<()>,
}

struct TimerState {
    run: Option<ActiveRun>,
    generation: u64,
    errors: BoundedHistory<f64>,
    target_interval: Duration,
    late_ticks: u64,
}

/// A periodic or one-shot timer driven by the monotonic clock.
///
/// All methods take `&self` so a timer can be shared (for example with an
/// emergency-stop path) behind an `Arc`. Starting requires a tokio runtime.
pub struct MonotonicIntervalTimer {
    label: &'static str,
    state: Arc<Mutex<TimerState>>,
}

impl Default for MonotonicIntervalTimer {
    fn default() -> Self {
        Self::new("timer")
    }
}

impl MonotonicIntervalTimer {
    /// Creates an idle timer; `label` only appears in log output.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            state: Arc::new(Mutex::new(TimerState {
                run: None,
                generation: 0,
                errors: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
                target_interval: Duration::ZERO,
                late_ticks: 0,
            })),
        }
    }

    /// Fires `listener` every `interval` until stopped.
    pub fn start_repeating<L: TickListener>(&self, interval: Duration, listener: L) -> Result<()> {
        self.start(TimerMode::Repeating, interval, listener)
    }

    /// Fires `listener` once after `delay`, then stops itself.
    pub fn start_one_shot<L: TickListener>(&self, delay: Duration, listener: L) -> Result<()> {
        self.start(TimerMode::OneShot, delay, listener)
    }

    fn start<L: TickListener>(&self, mode: TimerMode, interval: Duration, listener: L) -> Result<()> {
        if interval.is_zero() {
            return Err(CadenceError::invalid_configuration(format!(
                "{} timer interval must be greater than zero",
                self.label
            )));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CadenceError::NoRuntime)?;

        let mut state = self.lock();
        if let Some(run) = &state.run {
            info!(
                timer = self.label,
                mode = ?run.mode,
                "timer already running, ignoring start"
            );
            return Ok(());
        }

        state.generation += 1;
        state.errors.clear();
        state.late_ticks = 0;
        state.target_interval = interval;

        let generation = state.generation;
        let (control, control_rx) = watch::channel(Control {
            paused: false,
            interval,
        });
        let task = runtime.spawn(run_timer(
            self.label,
            Arc::clone(&self.state),
            control_rx,
            mode,
            generation,
            listener,
        ));

        state.run = Some(ActiveRun {
            mode,
            control,
            task,
        });
        debug!(timer = self.label, ?mode, ?interval, "timer started");
        Ok(())
    }

    /// Stops the timer. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let run = self.lock().run.take();
        if let Some(run) = run {
            run.task.abort();
            debug!(timer = self.label, "timer stopped");
        }
    }

    /// Suspends future ticks. No-op unless running and not already paused.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Resumes a paused timer; the next tick fires one full interval later.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    fn set_paused(&self, paused: bool) {
        let state = self.lock();
        if let Some(run) = &state.run {
            run.control.send_if_modified(|control| {
                if control.paused == paused {
                    return false;
                }
                control.paused = paused;
                true
            });
        }
    }

    /// Changes the period used for the next deadline of a running timer.
    pub fn reschedule(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(CadenceError::invalid_configuration(format!(
                "{} timer interval must be greater than zero",
                self.label
            )));
        }
        let mut state = self.lock();
        if let Some(run) = &state.run {
            run.control.send_modify(|control| control.interval = interval);
            state.target_interval = interval;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().run.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.lock()
            .run
            .as_ref()
            .is_some_and(|run| run.control.borrow().paused)
    }

    pub fn mode(&self) -> Option<TimerMode> {
        self.lock().run.as_ref().map(|run| run.mode)
    }

    /// Error statistics over the most recent firings.
    pub fn timing_accuracy(&self) -> TimingAccuracyStats {
        let state = self.lock();
        let secs = |v: Option<f64>| Duration::from_secs_f64(v.unwrap_or(0.0).max(0.0));

        let mean_error = secs(state.errors.mean());
        let max_error = secs(state.errors.max());
        TimingAccuracyStats {
            mean_error,
            max_error,
            std_dev: secs(state.errors.std_dev()),
            sample_count: state.errors.len(),
            target_interval: state.target_interval,
            late_ticks: state.late_ticks,
            within_tolerance: mean_error <= MAX_MEAN_ERROR && max_error <= MAX_PEAK_ERROR,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        lock_state(&self.state)
    }
}

impl Drop for MonotonicIntervalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_state(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_timer<L: TickListener>(
    label: &'static str,
    state: Arc<Mutex<TimerState>>,
    mut control_rx: watch::Receiver<Control>,
    mode: TimerMode,
    generation: u64,
    mut listener: L,
) {
    let mut control = *control_rx.borrow_and_update();
    let mut anchor = Instant::now();
    let mut last_fired = anchor;
    let mut sequence = 0u64;

    loop {
        if control.paused {
            if control_rx.changed().await.is_err() {
                return;
            }
            control = *control_rx.borrow_and_update();
            if !control.paused {
                anchor = Instant::now();
                last_fired = anchor;
            }
            continue;
        }

        let deadline = anchor + control.interval;
        tokio::select! {
            _ = sleep_until(deadline) => {}
            changed = control_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                control = *control_rx.borrow_and_update();
                continue;
            }
        }

        let fired_at = Instant::now();
        let observed = fired_at.saturating_duration_since(last_fired);
        let error = observed.abs_diff(control.interval);
        sequence += 1;

        {
            let mut state = lock_state(&state);
            if state.generation != generation {
                return;
            }
            state.errors.push(error.as_secs_f64());
            if error > tolerance_for(control.interval) {
                state.late_ticks += 1;
            }
            if mode == TimerMode::OneShot {
                state.run = None;
            }
        }

        if error > TICK_WARNING_THRESHOLD {
            warn!(
                timer = label,
                sequence,
                error_ms = error.as_secs_f64() * 1000.0,
                "tick fired outside the 5ms accuracy window"
            );
        }

        listener.on_tick(Tick {
            sequence,
            scheduled_at: deadline,
            fired_at,
            interval: control.interval,
            error,
        });

        if mode == TimerMode::OneShot {
            return;
        }

        last_fired = fired_at;
        anchor = deadline;
        // Skip whole periods missed while the process was starved.
        if fired_at >= anchor + control.interval {
            anchor = fired_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::sleep;

    fn counter() -> (Arc<AtomicU64>, impl FnMut(Tick) + Send + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let handle = Arc::clone(&count);
        (count, move |_tick: Tick| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn tolerance_is_one_percent_with_floor() {
        assert_eq!(tolerance_for(Duration::from_secs(1)), Duration::from_millis(10));
        assert_eq!(tolerance_for(Duration::from_millis(5)), MIN_TOLERANCE);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_fires_on_cadence() {
        let timer = MonotonicIntervalTimer::new("test");
        let (count, listener) = counter();
        timer
            .start_repeating(Duration::from_millis(100), listener)
            .unwrap();

        sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let stats = timer.timing_accuracy();
        assert_eq!(stats.sample_count, 3);
        assert_eq!(stats.target_interval, Duration::from_millis(100));
        assert!(stats.within_tolerance);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_stops_after_single_firing() {
        let timer = MonotonicIntervalTimer::new("test");
        let (count, listener) = counter();
        timer
            .start_one_shot(Duration::from_millis(50), listener)
            .unwrap();
        assert_eq!(timer.mode(), Some(TimerMode::OneShot));

        sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored() {
        let timer = MonotonicIntervalTimer::new("test");
        let (first, listener) = counter();
        let (second, other) = counter();
        timer
            .start_repeating(Duration::from_millis(100), listener)
            .unwrap();
        timer.start_one_shot(Duration::from_millis(10), other).unwrap();

        sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(timer.mode(), Some(TimerMode::Repeating));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suspends_and_resume_restarts_period() {
        let timer = MonotonicIntervalTimer::new("test");
        let (count, listener) = counter();
        timer
            .start_repeating(Duration::from_millis(100), listener)
            .unwrap();

        sleep(Duration::from_millis(150)).await;
        timer.pause();
        assert!(timer.is_paused());
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        timer.resume();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_when_stopped_is_noop() {
        let timer = MonotonicIntervalTimer::new("test");
        timer.pause();
        timer.resume();
        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
        assert!(!timer.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_changes_next_deadline() {
        let timer = MonotonicIntervalTimer::new("test");
        let (count, listener) = counter();
        timer
            .start_repeating(Duration::from_millis(100), listener)
            .unwrap();
        timer.reschedule(Duration::from_millis(300)).unwrap();

        sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            timer.timing_accuracy().target_interval,
            Duration::from_millis(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected() {
        let timer = MonotonicIntervalTimer::new("test");
        let (_count, listener) = counter();
        assert!(matches!(
            timer.start_repeating(Duration::ZERO, listener),
            Err(CadenceError::InvalidConfiguration(_))
        ));
        assert!(!timer.is_running());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let timer = MonotonicIntervalTimer::new("test");
        let (_count, listener) = counter();
        assert!(matches!(
            timer.start_repeating(Duration::from_millis(10), listener),
            Err(CadenceError::NoRuntime)
        ));
    }
}
