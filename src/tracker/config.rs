//! Parameters of one tracking run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, MpptError};
use crate::instrument::SourceSettings;

/// Default descent step scale.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
/// Default dark baseline length.
pub const DEFAULT_DARK_DURATION: Duration = Duration::from_secs(3);
/// Default seed bracket offset (V).
pub const DEFAULT_BRACKET_STEP: f64 = 0.02;
/// Default fallback gradient for repeated voltages (V).
pub const DEFAULT_PERTURBATION: f64 = 0.002;

/// Immutable configuration handed to [`PowerTracker`](super::PowerTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Expected maximum-power-point voltage from a prior scan (V)
    pub seed_voltage: f64,
    /// Length of the steepest-descent phase
    pub track_duration: Duration,
    /// Device area (cm^2)
    pub device_area: f64,
    /// Illumination intensity (suns)
    pub suns: f64,
    /// Step-size multiplier for the gradient step
    pub learning_rate: f64,
    /// Baseline measured at 0 V with the shutter closed
    pub dark_duration: Duration,
    /// Offset of the two seed points around `seed_voltage` (V)
    pub bracket_step: f64,
    /// Gradient substituted when two consecutive voltages are equal (V)
    pub random_perturbation_magnitude: f64,
    /// Instrument setup applied before the run
    pub source: SourceSettings,
}

impl TrackerConfig {
    /// Configuration with the four run-specific values and default tuning.
    pub fn new(seed_voltage: f64, track_duration: Duration, device_area: f64, suns: f64) -> Self {
        Self {
            seed_voltage,
            track_duration,
            device_area,
            suns,
            learning_rate: DEFAULT_LEARNING_RATE,
            dark_duration: DEFAULT_DARK_DURATION,
            bracket_step: DEFAULT_BRACKET_STEP,
            random_perturbation_magnitude: DEFAULT_PERTURBATION,
            source: SourceSettings::default(),
        }
    }

    /// Override the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Override the dark baseline length.
    pub fn with_dark_duration(mut self, dark_duration: Duration) -> Self {
        self.dark_duration = dark_duration;
        self
    }

    /// Override the seed bracket offset.
    pub fn with_bracket_step(mut self, bracket_step: f64) -> Self {
        self.bracket_step = bracket_step;
        self
    }

    /// Override the repeated-voltage perturbation magnitude.
    pub fn with_perturbation(mut self, magnitude: f64) -> Self {
        self.random_perturbation_magnitude = magnitude;
        self
    }

    /// Override the instrument setup.
    pub fn with_source(mut self, source: SourceSettings) -> Self {
        self.source = source;
        self
    }

    /// Total wall-clock budget measured from the start of the dark phase.
    pub fn total_duration(&self) -> Duration {
        self.dark_duration + self.track_duration
    }

    /// Reject values that would make the loop meaningless.
    pub fn validate(&self) -> AppResult<()> {
        let finite = [
            ("seed_voltage", self.seed_voltage),
            ("device_area", self.device_area),
            ("suns", self.suns),
            ("learning_rate", self.learning_rate),
            ("bracket_step", self.bracket_step),
            (
                "random_perturbation_magnitude",
                self.random_perturbation_magnitude,
            ),
        ];
        if let Some((name, value)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MpptError::Configuration(format!(
                "{} must be finite, got {}",
                name, value
            )));
        }

        for (name, value) in [
            ("device_area", self.device_area),
            ("suns", self.suns),
            ("learning_rate", self.learning_rate),
            ("bracket_step", self.bracket_step),
            (
                "random_perturbation_magnitude",
                self.random_perturbation_magnitude,
            ),
        ] {
            if value <= 0.0 {
                return Err(MpptError::Configuration(format!(
                    "{} must be > 0, got {}",
                    name, value
                )));
            }
        }

        if self.seed_voltage.abs() > self.source.voltage_range {
            return Err(MpptError::Configuration(format!(
                "seed_voltage {} V is outside the ±{} V source range",
                self.seed_voltage, self.source.voltage_range
            )));
        }

        Ok(())
    }
}
