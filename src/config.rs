//! Session and application configuration.
//!
//! Configuration values are plain serde data: the engine receives an immutable
//! [`SessionConfiguration`] snapshot per session and never mutates it in place.
//! [`AppConfig`] bundles everything the `cadence` binary persists to JSON.

use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::randomizer::RandomizerConfiguration;
use crate::scheduler::SchedulerConfig;

/// A screen location in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns this point shifted by the given offsets.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.0}, {:.0})", self.x, self.y)
    }
}

/// The kind of pointer click to synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickKind {
    #[default]
    Left,
    Right,
    Middle,
    Double,
}

impl fmt::Display for ClickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClickKind::Left => "left",
            ClickKind::Right => "right",
            ClickKind::Middle => "middle",
            ClickKind::Double => "double",
        };
        f.write_str(name)
    }
}

impl FromStr for ClickKind {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "left" | "l" => Ok(ClickKind::Left),
            "right" | "r" => Ok(ClickKind::Right),
            "middle" | "m" => Ok(ClickKind::Middle),
            "double" | "double-left" => Ok(ClickKind::Double),
            other => Err(CadenceError::invalid_configuration(format!(
                "unknown click kind '{other}'"
            ))),
        }
    }
}

/// Immutable per-session settings supplied to the engine at start.
///
/// `max_clicks` and `max_duration` may both be set; whichever limit is
/// reached first stops the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    #[serde(default)]
    pub location: Point,

    #[serde(default)]
    pub click_kind: ClickKind,

    #[serde(
        rename = "interval",
        with = "duration_serde",
        default = "default_base_interval"
    )]
    pub base_interval: Duration,

    #[serde(default)]
    pub max_clicks: Option<u64>,

    #[serde(default, with = "option_duration_serde")]
    pub max_duration: Option<Duration>,

    #[serde(default)]
    pub stop_on_error: bool,

    #[serde(default)]
    pub randomize: bool,

    /// Radius in pixels of the disc each click location is jittered within.
    #[serde(default)]
    pub location_jitter: f64,

    /// Process name hint forwarded to the click executor.
    #[serde(default)]
    pub target_process: Option<String>,
}

fn default_base_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            location: Point::default(),
            click_kind: ClickKind::default(),
            base_interval: default_base_interval(),
            max_clicks: None,
            max_duration: None,
            stop_on_error: false,
            randomize: false,
            location_jitter: 0.0,
            target_process: None,
        }
    }
}

impl SessionConfiguration {
    /// Creates a configuration clicking `location` every `base_interval`.
    pub fn new(location: Point, base_interval: Duration) -> Self {
        Self {
            location,
            base_interval,
            ..Self::default()
        }
    }

    pub fn with_click_kind(mut self, kind: ClickKind) -> Self {
        self.click_kind = kind;
        self
    }

    pub fn with_max_clicks(mut self, max_clicks: u64) -> Self {
        self.max_clicks = Some(max_clicks);
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_randomization(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn with_location_jitter(mut self, radius: f64) -> Self {
        self.location_jitter = radius;
        self
    }

    /// Validates the configuration, returning `InvalidConfiguration` on the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.base_interval.is_zero() {
            return Err(CadenceError::invalid_configuration(
                "base interval must be greater than zero",
            ));
        }

        if self.max_clicks == Some(0) {
            return Err(CadenceError::invalid_configuration(
                "max_clicks must be greater than zero when set",
            ));
        }

        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(CadenceError::invalid_configuration(
                "max_duration must be greater than zero when set",
            ));
        }

        if !self.location_jitter.is_finite() || self.location_jitter < 0.0 {
            return Err(CadenceError::invalid_configuration(
                "location_jitter must be a finite, non-negative radius",
            ));
        }

        if !self.location.x.is_finite() || !self.location.y.is_finite() {
            return Err(CadenceError::invalid_configuration(
                "location coordinates must be finite",
            ));
        }

        Ok(())
    }
}

/// Everything the `cadence` binary reads from a JSON configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfiguration,

    #[serde(default)]
    pub randomizer: RandomizerConfiguration,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default = "default_pause_hotkey")]
    pub pause_hotkey: String,

    #[serde(default = "default_emergency_hotkey")]
    pub emergency_hotkey: String,

    #[serde(default)]
    pub verbose: bool,
}

fn default_pause_hotkey() -> String {
    "ctrl+alt+p".to_string()
}

fn default_emergency_hotkey() -> String {
    "ctrl+alt+s".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfiguration::default(),
            randomizer: RandomizerConfiguration::default(),
            scheduler: SchedulerConfig::default(),
            pause_hotkey: default_pause_hotkey(),
            emergency_hotkey: default_emergency_hotkey(),
            verbose: false,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| CadenceError::config_load(path, e.to_string()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| CadenceError::config_load(path, e.to_string()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| CadenceError::config_save(path, e.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.randomizer.validate()?;
        self.scheduler.validate()?;

        if self.pause_hotkey.trim().is_empty() || self.emergency_hotkey.trim().is_empty() {
            return Err(CadenceError::invalid_configuration(
                "hotkeys cannot be empty",
            ));
        }

        if self.pause_hotkey.eq_ignore_ascii_case(&self.emergency_hotkey) {
            return Err(CadenceError::invalid_configuration(
                "pause and emergency-stop hotkeys must differ",
            ));
        }

        Ok(())
    }
}

/// Parses a human duration string such as `"250ms"`, `"1.5s"`, `"2m"` or `"1h"`.
///
/// Bare numbers are milliseconds. Units are case-insensitive and surrounding
/// whitespace is ignored.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(CadenceError::invalid_duration(input, "empty duration"));
    }

    let split = normalized
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split);

    if number.is_empty() {
        return Err(CadenceError::invalid_duration(
            input,
            "missing non-negative numeric value",
        ));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| CadenceError::invalid_duration(input, "malformed number"))?;

    let nanos_per_unit: f64 = match unit.trim() {
        "" | "ms" => 1e6,
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "s" | "sec" | "secs" => 1e9,
        "m" | "min" | "mins" => 60e9,
        "h" | "hr" | "hrs" => 3_600e9,
        other => {
            return Err(CadenceError::invalid_duration(
                input,
                format!("unknown unit '{other}'"),
            ))
        }
    };

    let nanos = (value * nanos_per_unit).round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Err(CadenceError::invalid_duration(input, "duration too large"));
    }

    Ok(Duration::from_nanos(nanos as u64))
}

/// Formats a duration the way [`parse_duration`] reads it back.
pub fn format_duration(duration: &Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

pub mod duration_serde {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

pub mod option_duration_serde {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&format_duration(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
