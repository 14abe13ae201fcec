//! One-shot execution at a future wall-clock instant.
//!
//! A schedule runs on its own task. A monotonic one-shot timer wakes it
//! `lead_time` before the deadline, after which it polls the wall clock every
//! `poll_interval` and fires once the remaining time drops to
//! `fire_threshold`. A low-frequency drift check compares wall-clock and
//! monotonic progress; small disagreements are only logged, larger ones
//! re-arm the lead timer against the wall clock. Countdown values for
//! observers are published on a `watch` channel once per second.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{to_std, validate_system_time, Clock, SystemClock};
use crate::config::duration_serde;
use crate::error::{CadenceError, Result};
use crate::timer::{MonotonicIntervalTimer, Tick};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long before the deadline the final polling phase begins.
    #[serde(with = "duration_serde", default = "default_lead_time")]
    pub lead_time: Duration,

    #[serde(with = "duration_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// The action fires once the remaining time is at or below this.
    #[serde(with = "duration_serde", default = "default_fire_threshold")]
    pub fire_threshold: Duration,

    #[serde(with = "duration_serde", default = "default_drift_check_interval")]
    pub drift_check_interval: Duration,

    #[serde(with = "duration_serde", default = "default_countdown_interval")]
    pub countdown_interval: Duration,

    /// Wall-vs-monotonic disagreement above which the lead timer is re-armed.
    #[serde(with = "duration_serde", default = "default_drift_threshold")]
    pub drift_threshold: Duration,
}

fn default_lead_time() -> Duration {
    Duration::from_millis(100)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_fire_threshold() -> Duration {
    Duration::from_millis(5)
}

fn default_drift_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_countdown_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_drift_threshold() -> Duration {
    Duration::from_secs(1)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lead_time: default_lead_time(),
            poll_interval: default_poll_interval(),
            fire_threshold: default_fire_threshold(),
            drift_check_interval: default_drift_check_interval(),
            countdown_interval: default_countdown_interval(),
            drift_threshold: default_drift_threshold(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("poll_interval", self.poll_interval),
            ("drift_check_interval", self.drift_check_interval),
            ("countdown_interval", self.countdown_interval),
            ("drift_threshold", self.drift_threshold),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(CadenceError::invalid_configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.poll_interval > Duration::from_millis(10) {
            return Err(CadenceError::invalid_configuration(
                "poll_interval cannot exceed 10ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountdownPhase {
    #[default]
    Idle,
    Pending,
    FinalApproach,
    Fired,
    Cancelled,
}

/// Observer-facing state of the scheduler.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Countdown {
    pub phase: CountdownPhase,
    pub target: Option<DateTime<Utc>>,
    pub remaining: Duration,
}

/// Work to run when a schedule fires.
pub trait ScheduledAction: Send + 'static {
    fn fire(self);
}

impl<F> ScheduledAction for F
where
    F: FnOnce() + Send + 'static,
{
    fn fire(self) {
        self()
    }
}

struct ActiveSchedule {
    target: DateTime<Utc>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    active: Option<ActiveSchedule>,
    generation: u64,
}

/// Fires a single action at a future wall-clock instant.
pub struct DeferredExecutionScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SchedulerState>>,
    countdown: Arc<watch::Sender<Countdown>>,
}

impl DeferredExecutionScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock<C: Clock>(config: SchedulerConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let (countdown, _) = watch::channel(Countdown::default());
        Ok(Self {
            config,
            clock: Arc::new(clock),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            countdown: Arc::new(countdown),
        })
    }

    /// Arms `action` to run once at `target`, replacing any pending schedule.
    ///
    /// Returns `false`, without touching an existing schedule, when `target`
    /// is not strictly in the future or no tokio runtime is available.
    pub fn schedule<A: ScheduledAction>(&self, target: DateTime<Utc>, action: A) -> bool {
        match self.try_schedule(target, action) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "schedule rejected");
                false
            }
        }
    }

    /// Like [`schedule`](Self::schedule), reporting why a target was rejected.
    pub fn try_schedule<A: ScheduledAction>(&self, target: DateTime<Utc>, action: A) -> Result<()> {
        let now = self.clock.wall_now();
        if let Err(err) = validate_system_time(now) {
            warn!(error = %err, "scheduling against an untrusted system clock");
        }
        if target <= now {
            return Err(CadenceError::ScheduleInPast { target });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CadenceError::NoRuntime)?;

        self.cancel();

        let remaining = to_std(target - now);
        let mut state = self.lock();
        state.generation += 1;
        let context = ScheduleContext {
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            countdown: Arc::clone(&self.countdown),
            generation: state.generation,
            target,
        };
        context.publish(CountdownPhase::Pending, remaining);
        let task = runtime.spawn(run_schedule(context, action));
        state.active = Some(ActiveSchedule { target, task });

        info!(%target, ?remaining, "deferred execution scheduled");
        Ok(())
    }

    /// Schedules a signal instead of an action; the receiver resolves with the
    /// wall-clock instant at which the schedule fired.
    pub fn schedule_signal(&self, target: DateTime<Utc>) -> Result<oneshot::Receiver<DateTime<Utc>>> {
        let (tx, rx) = oneshot::channel();
        let clock = Arc::clone(&self.clock);
        self.try_schedule(target, move || {
            let _ = tx.send(clock.wall_now());
        })?;
        Ok(rx)
    }

    /// Cancels the pending schedule, if any. Idempotent.
    pub fn cancel(&self) {
        let active = self.lock().active.take();
        if let Some(active) = active {
            active.task.abort();
            self.countdown.send_replace(Countdown {
                phase: CountdownPhase::Cancelled,
                target: Some(active.target),
                remaining: Duration::ZERO,
            });
            info!(target = %active.target, "deferred execution cancelled");
        }
    }

    /// Wall-clock time left until the pending target; zero when nothing is pending.
    pub fn remaining_time(&self) -> Duration {
        match self.target() {
            Some(target) => to_std(target - self.clock.wall_now()),
            None => Duration::ZERO,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn target(&self) -> Option<DateTime<Utc>> {
        self.lock().active.as_ref().map(|active| active.target)
    }

    pub fn subscribe(&self) -> watch::Receiver<Countdown> {
        self.countdown.subscribe()
    }

    /// Sanity check of the wall clock this scheduler reads.
    pub fn validate_system_time(&self) -> Result<()> {
        validate_system_time(self.clock.wall_now())
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        lock_state(&self.state)
    }
}

impl Drop for DeferredExecutionScheduler {
    fn drop(&mut self) {
        if let Some(active) = self.lock().active.take() {
            active.task.abort();
        }
    }
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ScheduleContext {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SchedulerState>>,
    countdown: Arc<watch::Sender<Countdown>>,
    generation: u64,
    target: DateTime<Utc>,
}

impl ScheduleContext {
    fn remaining(&self) -> Duration {
        to_std(self.target - self.clock.wall_now())
    }

    fn publish(&self, phase: CountdownPhase, remaining: Duration) {
        self.countdown.send_replace(Countdown {
            phase,
            target: Some(self.target),
            remaining,
        });
    }

    /// Arms the lead timer for `remaining`; returns the monotonic instant the
    /// deadline is expected at.
    fn arm(&self, timer: &MonotonicIntervalTimer, lead_tx: &mpsc::Sender<()>, remaining: Duration) -> Instant {
        timer.stop();
        let expected = self.clock.now() + remaining;
        let delay = remaining.saturating_sub(self.config.lead_time);
        if delay.is_zero() {
            let _ = lead_tx.try_send(());
            return expected;
        }

        let tx = lead_tx.clone();
        let armed = timer.start_one_shot(delay, move |_tick: Tick| {
            let _ = tx.try_send(());
        });
        if let Err(err) = armed {
            warn!(error = %err, "lead timer failed to start, entering final approach");
            let _ = lead_tx.try_send(());
        }
        expected
    }

    /// Takes ownership of the firing; false if the schedule was cancelled or replaced.
    fn claim(&self) -> bool {
        let mut state = lock_state(&self.state);
        if state.generation != self.generation || state.active.is_none() {
            return false;
        }
        state.active = None;
        true
    }
}

async fn run_schedule<A: ScheduledAction>(context: ScheduleContext, action: A) {
    let config = context.config.clone();
    let lead_timer = MonotonicIntervalTimer::new("schedule-lead");
    let (lead_tx, mut lead_rx) = mpsc::channel(1);

    let start = Instant::now();
    let mut countdown = interval_at(start + config.countdown_interval, config.countdown_interval);
    countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut drift = interval_at(start + config.drift_check_interval, config.drift_check_interval);
    drift.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut expected = context.arm(&lead_timer, &lead_tx, context.remaining());

    loop {
        tokio::select! {
            _ = countdown.tick() => {
                context.publish(CountdownPhase::Pending, context.remaining());
            }
            _ = drift.tick() => {
                let wall_remaining = context.remaining();
                let monotonic_remaining = expected.saturating_duration_since(context.clock.now());
                let skew = wall_remaining.abs_diff(monotonic_remaining);
                if skew > config.drift_threshold {
                    warn!(?skew, ?wall_remaining, "wall clock drifted, re-arming schedule");
                    expected = context.arm(&lead_timer, &lead_tx, wall_remaining);
                } else {
                    debug!(?skew, "drift check");
                }
            }
            Some(()) = lead_rx.recv() => {
                context.publish(CountdownPhase::FinalApproach, context.remaining());
                let remaining = final_approach(&context).await;
                if remaining <= config.fire_threshold {
                    break;
                }
                // The wall clock moved backwards past the lead window.
                warn!(?remaining, "deadline receded during final approach, re-arming");
                expected = context.arm(&lead_timer, &lead_tx, remaining);
            }
        }
    }

    lead_timer.stop();
    if !context.claim() {
        return;
    }
    let late_by = to_std(context.clock.wall_now() - context.target);
    context.publish(CountdownPhase::Fired, Duration::ZERO);
    info!(target = %context.target, ?late_by, "deferred execution fired");
    action.fire();
}

/// Polls until the deadline is within the firing threshold, or until it has
/// receded beyond twice the lead window. Returns the last observed remaining time.
async fn final_approach(context: &ScheduleContext) -> Duration {
    let config = &context.config;
    loop {
        let remaining = context.remaining();
        if remaining <= config.fire_threshold || remaining > config.lead_time * 2 {
            return remaining;
        }
        sleep(config.poll_interval).await;
    }
}
