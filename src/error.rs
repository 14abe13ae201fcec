//! Custom error types for cadence-clicker.
//!
//! This module provides structured error types using `thiserror`. Configuration
//! problems are returned synchronously at call time, per-tick click failures are
//! recorded and only escalate on policy, and timing-budget overruns are logged
//! and counted rather than being fatal.

use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::executor::ClickErrorKind;

/// Main error type for cadence-clicker operations.
#[derive(Error, Debug)]
pub enum CadenceError {
    /// A configuration value was rejected (non-positive interval, bad clamp range, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A deferred start was requested for an instant that is not strictly in the future.
    #[error("scheduling target {target} is not in the future")]
    ScheduleInPast { target: DateTime<Utc> },

    /// The click executor reported a failure for a single tick.
    #[error("click at ({x}, {y}) failed: {kind}")]
    ClickExecutionFailure { kind: ClickErrorKind, x: f64, y: f64 },

    /// A tick or an emergency-stop cleanup ran past its latency budget.
    #[error("{operation} took {elapsed:?}, exceeding its {budget:?} budget")]
    TimingBudgetExceeded {
        operation: &'static str,
        budget: Duration,
        elapsed: Duration,
    },

    /// The wall clock reports a calendar year outside the trusted window.
    #[error("system clock is untrustworthy: reported year {year}")]
    UntrustedSystemClock { year: i32 },

    /// The optional permission check refused to authorize a session.
    #[error("input automation permission has not been granted")]
    PermissionDenied,

    /// The engine's coordinating task is gone.
    #[error("automation engine is no longer running")]
    EngineUnavailable,

    /// Timers and engines must be started from inside a Tokio runtime.
    #[error("no tokio runtime available to run timers")]
    NoRuntime,

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error registering or handling hotkey.
    #[error("hotkey error: {0}")]
    Hotkey(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for cadence-clicker operations.
pub type Result<T> = std::result::Result<T, CadenceError>;

impl CadenceError {
    /// Create a new InvalidConfiguration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a new ClickExecutionFailure error.
    pub fn click_failed(kind: ClickErrorKind, x: f64, y: f64) -> Self {
        Self::ClickExecutionFailure { kind, x, y }
    }

    /// Create a new TimingBudgetExceeded error.
    pub fn budget_exceeded(operation: &'static str, budget: Duration, elapsed: Duration) -> Self {
        Self::TimingBudgetExceeded {
            operation,
            budget,
            elapsed,
        }
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigSave error.
    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Hotkey error.
    pub fn hotkey(message: impl Into<String>) -> Self {
        Self::Hotkey(message.into())
    }

    /// Whether the error was caused by the caller's input rather than the environment.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::ScheduleInPast { .. } | Self::InvalidDuration { .. }
        )
    }
}
