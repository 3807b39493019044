//! Source-meter capability consumed by the tracker.
//!
//! The tracker only ever needs a handful of operations from the instrument:
//! set it up once, switch the output and the illumination shutter, command a
//! voltage, and read back a (voltage, current) pair. [`SourceMeter`] captures
//! exactly that, so the control loop can run against real hardware
//! ([`Keithley2400`]) or an in-process stand-in ([`MockSourceMeter`]).
//!
//! Implementations own all protocol details, including the shutter polarity of
//! the physical rig. The tracker never assumes what "open" looks like on the wire.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::measurement::Reading;

pub mod keithley2400;
pub mod mock;
pub mod scpi;
pub mod simulated_cell;

pub use keithley2400::Keithley2400;
pub use mock::{MockCall, MockSourceMeter};
pub use scpi::ScpiTransport;
pub use simulated_cell::SimulatedCell;

/// One-time source-meter setup applied before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Source voltage range (V)
    pub voltage_range: f64,
    /// Measurement current range (A)
    pub current_range: f64,
    /// Current compliance limit (A)
    pub compliance_current: f64,
    /// Integration time in power-line cycles
    pub nplc: f64,
    /// Delay between sourcing and measuring (s)
    pub source_delay_s: f64,
    /// Use remote (4-wire) sensing
    pub four_wire: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            voltage_range: 2.0,
            current_range: 0.1,
            compliance_current: 0.1,
            nplc: 0.01,
            source_delay_s: 0.0,
            four_wire: true,
        }
    }
}

impl SourceSettings {
    /// Source delay as a duration. Negative or unrepresentable values read as zero.
    pub fn source_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.source_delay_s).unwrap_or(Duration::ZERO)
    }
}

/// Capability contract for a voltage-sourcing, current-measuring instrument.
///
/// Every call is a blocking round trip as far as the caller is concerned: the
/// future resolves once the instrument has accepted the command (or answered
/// the query). Nothing here is atomic across calls.
#[async_trait]
pub trait SourceMeter: Send {
    /// Apply [`SourceSettings`]. A failure here means the run cannot start.
    async fn configure(&mut self, settings: &SourceSettings) -> AppResult<()>;

    /// Switch the source output stage.
    async fn set_output_enabled(&mut self, enabled: bool) -> AppResult<()>;

    /// Expose (`true`) or shade (`false`) the device under test.
    async fn set_shutter_open(&mut self, open: bool) -> AppResult<()>;

    /// Command the source voltage. Does not measure.
    async fn set_voltage(&mut self, voltage: f64) -> AppResult<()>;

    /// Combined voltage/current read at the present operating point.
    async fn measure(&mut self) -> AppResult<Reading>;

    /// Front-panel display. Instruments without one ignore this.
    async fn set_display_enabled(&mut self, _enabled: bool) -> AppResult<()> {
        Ok(())
    }

    /// Identification string, for the run log.
    async fn identify(&mut self) -> AppResult<String> {
        Ok("unknown".to_string())
    }
}
