//! # Cadence Clicker
//!
//! A timing and execution engine for repetitive pointer clicks.
//!
//! ## Features
//!
//! - Drift-free fixed-interval ticks on the monotonic clock
//! - Humanlike interval randomization (uniform, normal, exponential, triangular)
//! - One-shot starts at a future wall-clock instant with drift detection
//! - An idle/running/paused/error session state machine with limits
//! - Emergency stop that settles within 50ms
//! - Global hotkeys for pause and emergency stop
//! - JSON configuration file support
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use cadence_clicker::{AutomationSessionEngine, DryRunClickExecutor, Point, SessionConfiguration};
//!
//! # async fn run() -> cadence_clicker::Result<()> {
//! let engine = AutomationSessionEngine::new(DryRunClickExecutor::new())?;
//! let config = SessionConfiguration::new(Point::new(640.0, 480.0), Duration::from_millis(100))
//!     .with_max_clicks(50);
//! engine.start(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "session": { "location": { "x": 640, "y": 480 }, "interval": "100ms", "max_clicks": 50 },
//!   "randomizer": { "variance": 0.2, "distribution": "normal", "humanness": "medium" },
//!   "pause_hotkey": "ctrl+alt+p",
//!   "emergency_hotkey": "ctrl+alt+s"
//! }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod global_hotkey;
pub mod history;
pub mod process_finder;
pub mod randomizer;
pub mod scheduler;
pub mod session;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ClickKind, Point, SessionConfiguration};
pub use engine::{
    AutomationSessionEngine, EmergencyStopReport, EngineBuilder, HealthStatus, SessionState,
    StatusObserver, StatusSnapshot,
};
pub use error::{CadenceError, Result};
pub use executor::{
    ClickErrorKind, ClickExecutor, ClickOutcome, DryRunClickExecutor, PermissionCheck,
    TargetProcess,
};
#[cfg(windows)]
pub use executor::SendInputClickExecutor;
pub use global_hotkey::{HotkeyAction, HotkeyManager};
pub use process_finder::{ProcessFinder, TargetGuard};
pub use randomizer::{
    DistributionKind, HumannessLevel, IntervalRandomizer, RandomizerConfiguration,
    RandomizerStatistics,
};
pub use scheduler::{Countdown, CountdownPhase, DeferredExecutionScheduler, SchedulerConfig};
pub use session::{SessionStatistics, SessionSummary, StopReason};
pub use timer::{MonotonicIntervalTimer, Tick, TimingAccuracyStats};
