//! Humanlike randomization of click intervals.
//!
//! The randomizer perturbs a base interval by a zero-centred offset drawn from
//! a configurable distribution. The offset's span is the base interval times
//! the variance fraction times the humanness multiplier, and every result is
//! clamped to the configured `[minimum_interval, maximum_interval]` range.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::duration_serde;
use crate::error::{CadenceError, Result};
use crate::history::{BoundedHistory, DEFAULT_HISTORY_CAPACITY};

/// Size of the short window used for pattern-uniformity scoring.
pub const RECENT_WINDOW: usize = 20;

/// Shape of the random offset added to the base interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    Uniform,
    #[default]
    Normal,
    Exponential,
    Triangular,
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistributionKind::Uniform => "uniform",
            DistributionKind::Normal => "normal",
            DistributionKind::Exponential => "exponential",
            DistributionKind::Triangular => "triangular",
        };
        f.write_str(name)
    }
}

impl FromStr for DistributionKind {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "uniform" => Ok(DistributionKind::Uniform),
            "normal" | "gaussian" => Ok(DistributionKind::Normal),
            "exponential" => Ok(DistributionKind::Exponential),
            "triangular" => Ok(DistributionKind::Triangular),
            other => Err(CadenceError::invalid_configuration(format!(
                "unknown distribution '{other}'"
            ))),
        }
    }
}

/// Named variance multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumannessLevel {
    None,
    Low,
    #[default]
    Medium,
    High,
    Extreme,
}

impl HumannessLevel {
    pub const MAX_MULTIPLIER: f64 = 2.0;

    pub fn multiplier(self) -> f64 {
        match self {
            HumannessLevel::None => 0.0,
            HumannessLevel::Low => 0.5,
            HumannessLevel::Medium => 1.0,
            HumannessLevel::High => 1.5,
            HumannessLevel::Extreme => 2.0,
        }
    }
}

impl fmt::Display for HumannessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HumannessLevel::None => "none",
            HumannessLevel::Low => "low",
            HumannessLevel::Medium => "medium",
            HumannessLevel::High => "high",
            HumannessLevel::Extreme => "extreme",
        };
        f.write_str(name)
    }
}

impl FromStr for HumannessLevel {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(HumannessLevel::None),
            "low" => Ok(HumannessLevel::Low),
            "medium" => Ok(HumannessLevel::Medium),
            "high" => Ok(HumannessLevel::High),
            "extreme" => Ok(HumannessLevel::Extreme),
            other => Err(CadenceError::invalid_configuration(format!(
                "unknown humanness level '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomizerConfiguration {
    #[serde(default)]
    pub enabled: bool,

    /// Fraction of the base interval the offset may span, 0.0..=1.0.
    #[serde(default = "default_variance")]
    pub variance: f64,

    #[serde(default)]
    pub distribution: DistributionKind,

    #[serde(default)]
    pub humanness: HumannessLevel,

    #[serde(with = "duration_serde", default = "default_minimum_interval")]
    pub minimum_interval: Duration,

    #[serde(with = "duration_serde", default = "default_maximum_interval")]
    pub maximum_interval: Duration,

    /// Probability, 0.0..=1.0, of replacing the offset with a wide uniform draw.
    #[serde(default = "default_pattern_breakup")]
    pub pattern_breakup_frequency: f64,
}

fn default_variance() -> f64 {
    0.2
}

fn default_minimum_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_maximum_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_pattern_breakup() -> f64 {
    0.05
}

impl Default for RandomizerConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            variance: default_variance(),
            distribution: DistributionKind::default(),
            humanness: HumannessLevel::default(),
            minimum_interval: default_minimum_interval(),
            maximum_interval: default_maximum_interval(),
            pattern_breakup_frequency: default_pattern_breakup(),
        }
    }
}

impl RandomizerConfiguration {
    /// Variance fraction after the humanness multiplier is applied.
    pub fn effective_variance(&self) -> f64 {
        self.variance * self.humanness.multiplier()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.variance) {
            return Err(CadenceError::invalid_configuration(
                "variance must be between 0.0 and 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.pattern_breakup_frequency) {
            return Err(CadenceError::invalid_configuration(
                "pattern_breakup_frequency must be between 0.0 and 1.0",
            ));
        }
        if self.minimum_interval.is_zero() {
            return Err(CadenceError::invalid_configuration(
                "minimum_interval must be greater than zero",
            ));
        }
        if self.minimum_interval > self.maximum_interval {
            return Err(CadenceError::invalid_configuration(
                "minimum_interval cannot exceed maximum_interval",
            ));
        }
        Ok(())
    }
}

/// Aggregate statistics over the produced intervals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RandomizerStatistics {
    pub sample_count: usize,
    pub mean: Duration,
    pub std_dev: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Observed over expected standard deviation, capped at 1.
    pub variance_achievement: f64,
    /// Mean relative change between consecutive recent intervals; lower is more repetitive.
    pub pattern_uniformity: f64,
    /// Composite score, 0..=100.
    pub human_likeness: f64,
}

pub struct IntervalRandomizer {
    config: RandomizerConfiguration,
    rng: StdRng,
    recent: BoundedHistory<f64>,
    history: BoundedHistory<f64>,
}

impl IntervalRandomizer {
    pub fn new(config: RandomizerConfiguration) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic randomizer for reproducible runs and tests.
    pub fn with_seed(config: RandomizerConfiguration, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RandomizerConfiguration, rng: StdRng) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            recent: BoundedHistory::new(RECENT_WINDOW),
            history: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
        })
    }

    pub fn configuration(&self) -> &RandomizerConfiguration {
        &self.config
    }

    /// Returns the next interval for `base`.
    ///
    /// When disabled the base interval is returned untouched and nothing is recorded.
    pub fn randomize(&mut self, base: Duration) -> Duration {
        if !self.config.enabled {
            return base;
        }

        let span = base.as_secs_f64() * self.config.effective_variance();
        let offset = if self.rng.gen::<f64>() < self.config.pattern_breakup_frequency {
            self.rng.gen_range(-1.0..=1.0) * span * 2.0
        } else {
            self.sample_unit_offset() * span
        };

        let shifted = if offset > 0.0 {
            base.saturating_add(Duration::from_secs_f64(offset))
        } else if offset < 0.0 {
            base.saturating_sub(Duration::from_secs_f64(-offset))
        } else {
            base
        };
        let interval = shifted.clamp(self.config.minimum_interval, self.config.maximum_interval);

        let secs = interval.as_secs_f64();
        self.recent.push(secs);
        self.history.push(secs);
        interval
    }

    /// Draws an offset in units of the effective variance; almost always within -1..=1.
    fn sample_unit_offset(&mut self) -> f64 {
        match self.config.distribution {
            DistributionKind::Uniform => self.rng.gen_range(-1.0..=1.0),
            DistributionKind::Normal => {
                // Box-Muller; one sigma is a third of the span.
                let u1 = 1.0 - self.rng.gen::<f64>();
                let u2 = self.rng.gen::<f64>();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
                z / 3.0
            }
            DistributionKind::Exponential => {
                // Inverse CDF with unit rate, shifted so the mean sits on zero.
                let u = self.rng.gen::<f64>();
                let draw = -(1.0 - u).ln();
                (draw - 1.0).clamp(-1.0, 1.0)
            }
            DistributionKind::Triangular => {
                let sum = self.rng.gen::<f64>() + self.rng.gen::<f64>();
                sum - 1.0
            }
        }
    }

    /// Swaps in a new configuration and clears both histories.
    pub fn update_configuration(&mut self, config: RandomizerConfiguration) -> Result<()> {
        config.validate()?;
        debug!(
            distribution = %config.distribution,
            humanness = %config.humanness,
            "randomizer configuration updated"
        );
        self.config = config;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.history.clear();
    }

    pub fn statistics(&self) -> RandomizerStatistics {
        let secs = |v: Option<f64>| Duration::from_secs_f64(v.unwrap_or(0.0).max(0.0));

        let mean = self.history.mean().unwrap_or(0.0);
        let observed_std = self.history.std_dev().unwrap_or(0.0);
        let expected_std = mean * self.config.effective_variance() / 3.0;
        let variance_achievement = if expected_std > 0.0 {
            (observed_std / expected_std).min(1.0)
        } else {
            0.0
        };

        let pattern_uniformity = pattern_uniformity(&self.recent);

        let human_likeness = if self.config.enabled && !self.history.is_empty() {
            let uniformity_score = (100.0 - pattern_uniformity * 100.0).clamp(0.0, 100.0);
            let humanness_score =
                self.config.humanness.multiplier() / HumannessLevel::MAX_MULTIPLIER * 100.0;
            (variance_achievement * 100.0 + uniformity_score + humanness_score) / 3.0
        } else {
            0.0
        };

        RandomizerStatistics {
            sample_count: self.history.len(),
            mean: secs(self.history.mean()),
            std_dev: secs(self.history.std_dev()),
            min: secs(self.history.min()),
            max: secs(self.history.max()),
            variance_achievement,
            pattern_uniformity,
            human_likeness,
        }
    }
}

fn pattern_uniformity(recent: &BoundedHistory<f64>) -> f64 {
    let values: Vec<f64> = recent.iter().copied().collect();
    let ratios: Vec<f64> = values
        .windows(2)
        .filter(|pair| pair[0] > 0.0)
        .map(|pair| (1.0 - pair[1] / pair[0]).abs())
        .collect();

    if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}
