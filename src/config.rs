//! Settings loaded with Figment
//!
//! Values are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. The TOML settings file (default `config/mppt.toml`; a missing file is fine)
//! 3. Environment variables prefixed with `MPPT_`, with `__` separating sections
//!
//! ```text
//! MPPT_INSTRUMENT__TRANSPORT=serial
//! MPPT_TRACKING__LEARNING_RATE=0.05
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mppt_tracker::config::MpptSettings;
//!
//! let settings = MpptSettings::load_from("config/mppt.toml")?;
//! println!("Transport: {:?}", settings.instrument.transport);
//! # Ok::<(), mppt_tracker::error::MpptError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, MpptError};
use crate::instrument::SourceSettings;
use crate::tracker::TrackerConfig;

/// Default settings file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/mppt.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpptSettings {
    /// How to reach the source-meter
    pub instrument: InstrumentSettings,
    /// Source-meter setup applied before each run
    pub source: SourceSettings,
    /// Tracking algorithm tuning
    pub tracking: TrackingSettings,
}

/// Bus used to talk to the source-meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// VISA resource (GPIB, USB-TMC, LAN)
    Visa,
    /// RS-232 through a serial port
    Serial,
    /// In-process simulated cell, no hardware
    Mock,
}

/// Instrument connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Which bus the source-meter sits on
    pub transport: TransportKind,
    /// VISA resource string (e.g. "GPIB0::24::INSTR")
    pub resource: String,
    /// Per-call I/O timeout in milliseconds
    pub timeout_ms: u64,
    /// Serial device path (serial transport only)
    pub serial_port: String,
    /// Serial line speed (serial transport only)
    pub baud_rate: u32,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Visa,
            resource: "GPIB0::24::INSTR".to_string(),
            timeout_ms: 5000,
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

impl InstrumentSettings {
    /// [`Self::timeout_ms`] as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Tracking algorithm settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Descent step scale
    pub learning_rate: f64,
    /// Dark baseline length in seconds
    pub dark_duration_s: f64,
    /// Offset of the seed bracket points (V)
    pub bracket_step: f64,
    /// Gradient substituted for repeated voltages (V)
    pub random_perturbation_magnitude: f64,
    /// Trailing window for the end-of-run summary in seconds
    pub summary_window_s: f64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            dark_duration_s: 3.0,
            bracket_step: 0.02,
            random_perturbation_magnitude: 0.002,
            summary_window_s: 10.0,
        }
    }
}

impl TrackingSettings {
    /// Dark baseline length. Negative or unrepresentable values read as zero.
    pub fn dark_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.dark_duration_s).unwrap_or(Duration::ZERO)
    }

    /// Summary window. Negative or unrepresentable values read as zero.
    pub fn summary_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.summary_window_s).unwrap_or(Duration::ZERO)
    }
}

impl MpptSettings {
    /// Load from a specific file path and the environment, then validate.
    ///
    /// # Errors
    ///
    /// [`MpptError::Config`] if a layer cannot be parsed, or
    /// [`MpptError::Configuration`] if the merged values are invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered provider, exposed for `--print-config` style tooling.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MPPT_").split("__"))
    }

    /// Check transport-specific fields and numeric ranges.
    pub fn validate(&self) -> AppResult<()> {
        match self.instrument.transport {
            TransportKind::Visa if self.instrument.resource.trim().is_empty() => {
                return Err(MpptError::Configuration(
                    "instrument.resource cannot be empty for the visa transport".to_string(),
                ));
            }
            TransportKind::Serial if self.instrument.serial_port.trim().is_empty() => {
                return Err(MpptError::Configuration(
                    "instrument.serial_port cannot be empty for the serial transport".to_string(),
                ));
            }
            TransportKind::Serial if self.instrument.baud_rate == 0 => {
                return Err(MpptError::Configuration(
                    "instrument.baud_rate must be > 0".to_string(),
                ));
            }
            _ => {}
        }

        if self.instrument.timeout_ms == 0 {
            return Err(MpptError::Configuration(
                "instrument.timeout_ms must be > 0".to_string(),
            ));
        }

        let source = &self.source;
        for (name, value) in [
            ("source.voltage_range", source.voltage_range),
            ("source.current_range", source.current_range),
            ("source.compliance_current", source.compliance_current),
            ("source.nplc", source.nplc),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(MpptError::Configuration(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if !(source.source_delay_s.is_finite() && source.source_delay_s >= 0.0) {
            return Err(MpptError::Configuration(format!(
                "source.source_delay_s must be >= 0, got {}",
                source.source_delay_s
            )));
        }

        let tracking = &self.tracking;
        for (name, value) in [
            ("tracking.learning_rate", tracking.learning_rate),
            ("tracking.bracket_step", tracking.bracket_step),
            (
                "tracking.random_perturbation_magnitude",
                tracking.random_perturbation_magnitude,
            ),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(MpptError::Configuration(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("tracking.dark_duration_s", tracking.dark_duration_s),
            ("tracking.summary_window_s", tracking.summary_window_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MpptError::Configuration(format!(
                    "{} must be >= 0, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    /// Combine these settings with the per-run values given on the command line.
    pub fn tracker_config(
        &self,
        seed_voltage: f64,
        track_duration: Duration,
        device_area: f64,
        suns: f64,
    ) -> TrackerConfig {
        TrackerConfig::new(seed_voltage, track_duration, device_area, suns)
            .with_learning_rate(self.tracking.learning_rate)
            .with_dark_duration(self.tracking.dark_duration())
            .with_bracket_step(self.tracking.bracket_step)
            .with_perturbation(self.tracking.random_perturbation_magnitude)
            .with_source(self.source.clone())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MpptError::Configuration(format!("Cannot serialize settings: {}", e)))
    }
}
