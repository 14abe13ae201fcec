//! The automation session engine.
//!
//! The engine is split in two halves. [`AutomationSessionEngine`] is the
//! handle callers hold; every method sends a command to a single actor task
//! (the coordinating context) which owns the session record, the randomizer
//! and all state transitions. Timers run on their own tasks and only hand
//! ticks to the actor through bounded channels, so concurrent ticks never
//! race on shared fields.
//!
//! The one exception is [`AutomationSessionEngine::emergency_stop`]: it flips
//! the shared state to `error`, stops both timers and aborts the executor
//! directly from the caller before the actor has a chance to run, so any tick
//! that is already in flight cannot proceed.
//!
//! ```text
//! idle --start--> running --pause--> paused --resume--> running
//! running|paused --stop--> idle
//! running --emergency_stop--> error --> idle
//! running --click failure + stop_on_error--> error --> idle
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Point, SessionConfiguration};
use crate::error::{CadenceError, Result};
use crate::executor::{ClickErrorKind, ClickExecutor, PermissionCheck, TargetProcess};
use crate::randomizer::{IntervalRandomizer, RandomizerConfiguration, RandomizerStatistics};
use crate::session::{SessionRecord, SessionStatistics, SessionSummary, StopReason};
use crate::timer::{MonotonicIntervalTimer, Tick, TickListener, TimingAccuracyStats};

/// Cadence of the UI-facing status snapshot.
pub const STATUS_INTERVAL: Duration = Duration::from_millis(100);
/// Hard budget for the synchronous part of an emergency stop.
pub const EMERGENCY_STOP_BUDGET: Duration = Duration::from_millis(50);
/// Success rate below which a running session is reported as `warning`.
pub const HEALTHY_SUCCESS_RATE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Running => 1,
            SessionState::Paused => 2,
            SessionState::Error => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Running,
            2 => SessionState::Paused,
            3 => SessionState::Error,
            _ => SessionState::Idle,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Coarse status for steady-state display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    #[default]
    Idle,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
            HealthStatus::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Derives the health classification from state, timing accuracy and success rate.
pub fn classify_health(
    state: SessionState,
    timing: &TimingAccuracyStats,
    success_rate: Option<f64>,
) -> HealthStatus {
    match state {
        SessionState::Idle => HealthStatus::Idle,
        SessionState::Error => HealthStatus::Error,
        SessionState::Running | SessionState::Paused => {
            let degraded = !timing.within_tolerance
                || success_rate.is_some_and(|rate| rate < HEALTHY_SUCCESS_RATE);
            if degraded {
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            }
        }
    }
}

/// Read-only view of the engine, published at [`STATUS_INTERVAL`] while a session runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub health: HealthStatus,
    pub session: Option<SessionStatistics>,
    pub timing: TimingAccuracyStats,
    pub randomizer: Option<RandomizerStatistics>,
    pub current_interval: Option<Duration>,
    pub coalesced_ticks: u64,
    pub budget_overruns: u64,
    pub last_session: Option<SessionSummary>,
}

/// Receives every status snapshot the engine publishes.
pub trait StatusObserver: Send + Sync + 'static {
    fn on_status(&self, status: &StatusSnapshot);
}

/// Outcome of an emergency stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyStopReport {
    pub elapsed: Duration,
    pub within_budget: bool,
    /// Whether a session was running or paused when the stop was requested.
    pub was_active: bool,
}

enum Command {
    Start {
        config: SessionConfiguration,
        target: Option<TargetProcess>,
        reply: oneshot::Sender<Result<()>>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<Option<SessionSummary>>,
    },
    EmergencyStop {
        reply: oneshot::Sender<()>,
    },
    ConfigureRandomizer {
        config: RandomizerConfiguration,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct Shared {
    state: AtomicU8,
    click_timer: MonotonicIntervalTimer,
    status_timer: MonotonicIntervalTimer,
    executor: Arc<dyn ClickExecutor>,
    clock: Arc<dyn Clock>,
    coalesced_ticks: Arc<AtomicU64>,
    budget_overruns: AtomicU64,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn swap_state(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel))
    }

    fn stop_timers(&self) {
        self.click_timer.stop();
        self.status_timer.stop();
    }

    fn record_overrun(&self, err: &CadenceError) {
        self.budget_overruns.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "timing budget exceeded");
    }
}

/// Configures and spawns an [`AutomationSessionEngine`].
pub struct EngineBuilder {
    executor: Arc<dyn ClickExecutor>,
    clock: Arc<dyn Clock>,
    randomizer: RandomizerConfiguration,
    permission: Option<Arc<dyn PermissionCheck>>,
    observers: Vec<Arc<dyn StatusObserver>>,
    seed: Option<u64>,
}

impl EngineBuilder {
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn randomizer(mut self, config: RandomizerConfiguration) -> Self {
        self.randomizer = config;
        self
    }

    pub fn permission_check<P: PermissionCheck>(mut self, check: P) -> Self {
        self.permission = Some(Arc::new(check));
        self
    }

    pub fn observer<O: StatusObserver>(mut self, observer: O) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Seeds interval randomization and location jitter for reproducible sessions.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Spawns the coordinating task. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<AutomationSessionEngine> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CadenceError::NoRuntime)?;

        let (randomizer, rng) = match self.seed {
            Some(seed) => (
                IntervalRandomizer::with_seed(self.randomizer.clone(), seed)?,
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (
                IntervalRandomizer::new(self.randomizer.clone())?,
                StdRng::from_entropy(),
            ),
        };

        let shared = Arc::new(Shared {
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            click_timer: MonotonicIntervalTimer::new("click"),
            status_timer: MonotonicIntervalTimer::new("status"),
            executor: self.executor,
            clock: self.clock,
            coalesced_ticks: Arc::new(AtomicU64::new(0)),
            budget_overruns: AtomicU64::new(0),
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (status_tick_tx, status_tick_rx) = mpsc::channel(1);
        let (status_tx, status) = watch::channel(StatusSnapshot::default());

        let actor = Actor {
            shared: Arc::clone(&shared),
            commands: command_rx,
            ticks: tick_rx,
            tick_tx,
            status_ticks: status_tick_rx,
            status_tick_tx,
            status: status_tx,
            observers: self.observers,
            permission: self.permission,
            randomizer,
            randomizer_config: self.randomizer,
            rng,
            session: None,
            generation: 0,
            last_summary: None,
        };
        let task = runtime.spawn(actor.run());

        Ok(AutomationSessionEngine {
            commands,
            status,
            shared,
            task,
        })
    }
}

/// Handle to a running engine. Dropping it shuts the engine down.
pub struct AutomationSessionEngine {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl AutomationSessionEngine {
    pub fn builder<E: ClickExecutor>(executor: E) -> EngineBuilder {
        EngineBuilder {
            executor: Arc::new(executor),
            clock: Arc::new(SystemClock),
            randomizer: RandomizerConfiguration::default(),
            permission: None,
            observers: Vec::new(),
            seed: None,
        }
    }

    /// Engine with the system clock and default randomizer settings.
    pub fn new<E: ClickExecutor>(executor: E) -> Result<Self> {
        Self::builder(executor).build()
    }

    /// Starts a session. A no-op if a session is already active.
    ///
    /// Configuration errors are returned before anything is sent to the engine.
    pub async fn start(&self, config: SessionConfiguration) -> Result<()> {
        self.start_targeting(config, None).await
    }

    /// Like [`start`](Self::start), with a resolved target process passed to the executor.
    pub async fn start_targeting(
        &self,
        config: SessionConfiguration,
        target: Option<TargetProcess>,
    ) -> Result<()> {
        config.validate()?;
        let target = target.or_else(|| config.target_process.clone().map(TargetProcess::new));
        let (reply, response) = oneshot::channel();
        self.send(Command::Start {
            config,
            target,
            reply,
        })?;
        response.await.map_err(|_| CadenceError::EngineUnavailable)?
    }

    /// Returns `true` if a running session was paused.
    pub async fn pause(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Pause { reply }).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Returns `true` if a paused session was resumed.
    pub async fn resume(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Resume { reply }).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Pauses a running session or resumes a paused one.
    pub async fn toggle_pause(&self) -> SessionState {
        match self.state() {
            SessionState::Running => {
                self.pause().await;
            }
            SessionState::Paused => {
                self.resume().await;
            }
            _ => {}
        }
        self.state()
    }

    /// Stops the active session and returns its summary. Idempotent.
    pub async fn stop(&self) -> Option<SessionSummary> {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Stop { reply }).is_err() {
            self.shared.stop_timers();
            return None;
        }
        response.await.unwrap_or(None)
    }

    /// Tears the session down within [`EMERGENCY_STOP_BUDGET`]. Never fails.
    pub async fn emergency_stop(&self) -> EmergencyStopReport {
        let clock = &self.shared.clock;
        let started = clock.now();

        let previous = self.shared.swap_state(SessionState::Error);
        let was_active = previous.is_active();
        self.shared.stop_timers();
        self.shared.executor.abort();

        let (reply, response) = oneshot::channel();
        let settled = if self.send(Command::EmergencyStop { reply }).is_ok() {
            let remaining = EMERGENCY_STOP_BUDGET
                .saturating_sub(clock.now().saturating_duration_since(started));
            matches!(tokio::time::timeout(remaining, response).await, Ok(Ok(())))
        } else {
            false
        };

        if !settled {
            // The actor is stuck in a click or gone; settle from here.
            self.shared.set_state(SessionState::Idle);
        }

        let elapsed = clock.now().saturating_duration_since(started);
        let within_budget = settled && elapsed <= EMERGENCY_STOP_BUDGET;
        if !within_budget {
            self.shared.record_overrun(&CadenceError::budget_exceeded(
                "emergency stop",
                EMERGENCY_STOP_BUDGET,
                elapsed,
            ));
        }

        info!(?elapsed, was_active, "emergency stop complete");
        EmergencyStopReport {
            elapsed,
            within_budget,
            was_active,
        }
    }

    /// Replaces the randomizer settings used by the next session.
    pub async fn configure_randomizer(&self, config: RandomizerConfiguration) -> Result<()> {
        config.validate()?;
        let (reply, response) = oneshot::channel();
        self.send(Command::ConfigureRandomizer { config, reply })?;
        response.await.map_err(|_| CadenceError::EngineUnavailable)?
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Latest published snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn timing_accuracy(&self) -> TimingAccuracyStats {
        self.shared.click_timer.timing_accuracy()
    }

    /// Whether either engine timer currently holds a live task.
    pub fn has_active_timers(&self) -> bool {
        self.shared.click_timer.is_running() || self.shared.status_timer.is_running()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CadenceError::EngineUnavailable)
    }
}

impl Drop for AutomationSessionEngine {
    fn drop(&mut self) {
        self.shared.stop_timers();
        self.task.abort();
    }
}

struct TickForwarder {
    generation: u64,
    tx: mpsc::Sender<(u64, Tick)>,
    coalesced: Arc<AtomicU64>,
}

impl TickListener for TickForwarder {
    fn on_tick(&mut self, tick: Tick) {
        match self.tx.try_send((self.generation, tick)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(sequence = tick.sequence, "previous tick still in progress, coalescing");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

struct ActiveSession {
    config: SessionConfiguration,
    target: Option<TargetProcess>,
    record: SessionRecord,
    current_interval: Duration,
}

struct Actor {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    ticks: mpsc::Receiver<(u64, Tick)>,
    tick_tx: mpsc::Sender<(u64, Tick)>,
    status_ticks: mpsc::Receiver<()>,
    status_tick_tx: mpsc::Sender<()>,
    status: watch::Sender<StatusSnapshot>,
    observers: Vec<Arc<dyn StatusObserver>>,
    permission: Option<Arc<dyn PermissionCheck>>,
    randomizer: IntervalRandomizer,
    randomizer_config: RandomizerConfiguration,
    rng: StdRng,
    session: Option<ActiveSession>,
    generation: u64,
    last_summary: Option<SessionSummary>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((generation, tick)) = self.ticks.recv() => {
                    if generation == self.generation {
                        self.handle_tick(tick);
                    }
                }
                Some(()) = self.status_ticks.recv() => self.handle_status_tick(),
            }
        }

        self.shared.stop_timers();
        debug!("engine coordinating task exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                config,
                target,
                reply,
            } => {
                let _ = reply.send(self.start(config, target));
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Command::Stop { reply } => {
                let summary = if self.session.is_some() {
                    self.finish(StopReason::Requested)
                } else {
                    None
                };
                let _ = reply.send(summary);
            }
            Command::EmergencyStop { reply } => {
                self.settle_emergency_stop();
                let _ = reply.send(());
            }
            Command::ConfigureRandomizer { config, reply } => {
                self.randomizer_config = config;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn start(&mut self, config: SessionConfiguration, target: Option<TargetProcess>) -> Result<()> {
        let state = self.shared.state();
        if state != SessionState::Idle {
            info!(%state, "session already active, ignoring start");
            return Ok(());
        }

        if let Some(check) = &self.permission {
            if !check.is_authorized() {
                warn!("input automation permission not granted");
                return Err(CadenceError::PermissionDenied);
            }
        }

        let randomizer_config = RandomizerConfiguration {
            enabled: config.randomize,
            ..self.randomizer_config.clone()
        };
        self.randomizer.update_configuration(randomizer_config)?;

        self.generation += 1;
        let forwarder = TickForwarder {
            generation: self.generation,
            tx: self.tick_tx.clone(),
            coalesced: Arc::clone(&self.shared.coalesced_ticks),
        };
        self.shared
            .click_timer
            .start_repeating(config.base_interval, forwarder)?;

        let status_tx = self.status_tick_tx.clone();
        if let Err(err) = self
            .shared
            .status_timer
            .start_repeating(STATUS_INTERVAL, move |_tick: Tick| {
                let _ = status_tx.try_send(());
            })
        {
            self.shared.click_timer.stop();
            return Err(err);
        }

        self.shared.executor.rearm();
        let clock = &self.shared.clock;
        info!(
            location = %config.location,
            kind = %config.click_kind,
            interval = ?config.base_interval,
            max_clicks = ?config.max_clicks,
            max_duration = ?config.max_duration,
            randomize = config.randomize,
            "session started"
        );
        self.session = Some(ActiveSession {
            record: SessionRecord::new(clock.now(), clock.wall_now()),
            current_interval: config.base_interval,
            config,
            target,
        });
        self.shared.set_state(SessionState::Running);
        self.publish_status();
        Ok(())
    }

    fn pause(&mut self) -> bool {
        if self.shared.state() != SessionState::Running {
            return false;
        }
        // A tick that already fired still gets its click.
        self.drain_dispatched_ticks();
        if self.shared.state() != SessionState::Running {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        self.shared.click_timer.pause();
        session.record.begin_pause(self.shared.clock.now());
        self.shared.set_state(SessionState::Paused);
        info!("session paused");
        self.publish_status();
        true
    }

    fn resume(&mut self) -> bool {
        if self.shared.state() != SessionState::Paused {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.record.end_pause(self.shared.clock.now());
        self.shared.click_timer.resume();
        self.shared.set_state(SessionState::Running);
        info!("session resumed");
        self.publish_status();
        true
    }

    fn drain_dispatched_ticks(&mut self) {
        while let Ok((generation, tick)) = self.ticks.try_recv() {
            if generation == self.generation {
                self.handle_tick(tick);
            }
        }
    }

    fn handle_tick(&mut self, tick: Tick) {
        if self.shared.state() != SessionState::Running {
            return;
        }
        let now = self.shared.clock.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(reason) = limit_reached(session, now) {
            self.finish(reason);
            return;
        }

        if session.config.randomize {
            let next = self.randomizer.randomize(session.config.base_interval);
            session.current_interval = next;
            if let Err(err) = self.shared.click_timer.reschedule(next) {
                warn!(error = %err, "could not reschedule click timer");
            }
        }

        let location = jitter(&mut self.rng, session.config.location, session.config.location_jitter);
        let started = self.shared.clock.now();
        let outcome = self.shared.executor.perform_click(
            location,
            session.config.click_kind,
            session.target.as_ref(),
        );
        let finished = self.shared.clock.now();
        let latency = finished.saturating_duration_since(started);
        session.record.record_click(finished, latency, outcome);

        debug!(
            sequence = tick.sequence,
            %location,
            ?latency,
            error_us = tick.error.as_micros() as u64,
            ok = outcome.is_ok(),
            "tick"
        );

        if latency > session.current_interval {
            self.shared.record_overrun(&CadenceError::budget_exceeded(
                "click",
                session.current_interval,
                latency,
            ));
        }

        // An emergency stop may have landed while the executor was busy.
        if self.shared.state() != SessionState::Running {
            return;
        }

        if let Err(kind) = outcome {
            let err = CadenceError::click_failed(kind, location.x, location.y);
            if session.config.stop_on_error {
                self.fail(err, kind);
                return;
            }
            warn!(error = %err, "click failed, continuing");
        }

        if let Some(reason) = limit_reached(session, finished) {
            self.finish(reason);
        }
    }

    fn handle_status_tick(&mut self) {
        if self.shared.state() == SessionState::Running {
            let now = self.shared.clock.now();
            let reason = self
                .session
                .as_ref()
                .and_then(|session| limit_reached(session, now));
            if let Some(reason) = reason {
                self.finish(reason);
                return;
            }
        }
        self.publish_status();
    }

    fn fail(&mut self, err: CadenceError, kind: ClickErrorKind) {
        self.shared.set_state(SessionState::Error);
        self.shared.stop_timers();
        self.publish_status();
        error!(error = %err, ?kind, "stopping session after click failure");
        self.finish(StopReason::ClickFailure);
    }

    fn settle_emergency_stop(&mut self) {
        self.shared.stop_timers();
        if let Some(session) = self.session.as_mut() {
            session.record.mark_emergency_stopped();
        }
        if self.session.is_some() {
            self.finish(StopReason::EmergencyStop);
        } else {
            self.shared.set_state(SessionState::Idle);
            self.publish_status();
        }
    }

    /// Tears down timers, finalizes the record and settles in `idle`.
    fn finish(&mut self, reason: StopReason) -> Option<SessionSummary> {
        self.shared.stop_timers();
        let session = self.session.take()?;
        let summary = session.record.finalize(self.shared.clock.now(), reason);
        info!(
            ?reason,
            clicks = summary.statistics.total_clicks,
            successes = summary.statistics.successful_clicks,
            duration = ?summary.statistics.duration,
            "session ended"
        );
        self.last_summary = Some(summary.clone());
        self.shared.set_state(SessionState::Idle);
        self.publish_status();
        Some(summary)
    }

    fn publish_status(&mut self) {
        let now = self.shared.clock.now();
        let state = self.shared.state();
        let timing = self.shared.click_timer.timing_accuracy();
        let session = self
            .session
            .as_ref()
            .map(|session| session.record.statistics(now));
        let randomizer = self
            .session
            .as_ref()
            .filter(|session| session.config.randomize)
            .map(|_| self.randomizer.statistics());

        let snapshot = StatusSnapshot {
            state,
            health: classify_health(
                state,
                &timing,
                session.as_ref().map(|stats| stats.success_rate),
            ),
            session,
            timing,
            randomizer,
            current_interval: self.session.as_ref().map(|s| s.current_interval),
            coalesced_ticks: self.shared.coalesced_ticks.load(Ordering::Relaxed),
            budget_overruns: self.shared.budget_overruns.load(Ordering::Relaxed),
            last_session: self.last_summary.clone(),
        };

        for observer in &self.observers {
            observer.on_status(&snapshot);
        }
        self.status.send_replace(snapshot);
    }
}

fn limit_reached(session: &ActiveSession, now: tokio::time::Instant) -> Option<StopReason> {
    if session
        .config
        .max_clicks
        .is_some_and(|max| session.record.total_clicks() >= max)
    {
        return Some(StopReason::MaxClicksReached);
    }
    if session
        .config
        .max_duration
        .is_some_and(|max| session.record.duration(now) >= max)
    {
        return Some(StopReason::MaxDurationReached);
    }
    None
}

/// Uniform random point within `radius` of `location`.
fn jitter(rng: &mut StdRng, location: Point, radius: f64) -> Point {
    if radius <= 0.0 {
        return location;
    }
    let distance = radius * rng.gen::<f64>().sqrt();
    let angle = 2.0 * PI * rng.gen::<f64>();
    location.offset(distance * angle.cos(), distance * angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accurate() -> TimingAccuracyStats {
        TimingAccuracyStats::default()
    }

    #[test]
    fn health_classification() {
        assert_eq!(
            classify_health(SessionState::Idle, &accurate(), None),
            HealthStatus::Idle
        );
        assert_eq!(
            classify_health(SessionState::Error, &accurate(), Some(1.0)),
            HealthStatus::Error
        );
        assert_eq!(
            classify_health(SessionState::Running, &accurate(), Some(1.0)),
            HealthStatus::Healthy
        );
        assert_eq!(
            classify_health(SessionState::Running, &accurate(), Some(0.9)),
            HealthStatus::Warning
        );

        let sloppy = TimingAccuracyStats {
            mean_error: Duration::from_millis(3),
            within_tolerance: false,
            ..accurate()
        };
        assert_eq!(
            classify_health(SessionState::Paused, &sloppy, Some(1.0)),
            HealthStatus::Warning
        );
    }

    #[test]
    fn state_round_trips_through_atomic_encoding() {
        for state in [
            SessionState::Idle,
            SessionState::Running,
            SessionState::Paused,
            SessionState::Error,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn jitter_stays_inside_radius() {
        let mut rng = StdRng::seed_from_u64(1);
        let origin = Point::new(100.0, 100.0);
        assert_eq!(jitter(&mut rng, origin, 0.0), origin);
        for _ in 0..500 {
            let p = jitter(&mut rng, origin, 5.0);
            let distance = ((p.x - origin.x).powi(2) + (p.y - origin.y).powi(2)).sqrt();
            assert!(distance <= 5.0 + 1e-9);
        }
    }
}
