//! Single-diode solar-cell model used by the mock source-meter.

use serde::{Deserialize, Serialize};

/// Thermal voltage at 25 °C (V)
const THERMAL_VOLTAGE: f64 = 0.025_852;

/// Ideal single-diode cell with a parallel shunt.
///
/// Currents follow the source-meter convention: negative while the cell
/// delivers power, so output power `V × I` is negative at the maximum power
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCell {
    /// Short-circuit current density at 1 sun (mA/cm^2)
    pub jsc: f64,
    /// Diode saturation current density (mA/cm^2)
    pub j0: f64,
    /// Diode ideality factor
    pub ideality: f64,
    /// Shunt resistance (ohm cm^2)
    pub shunt_resistance: f64,
    /// Device area (cm^2)
    pub area: f64,
    /// Illumination intensity (suns)
    pub suns: f64,
}

impl Default for SimulatedCell {
    fn default() -> Self {
        Self {
            jsc: 22.0,
            j0: 1e-9,
            ideality: 1.5,
            shunt_resistance: 5_000.0,
            area: 0.0935,
            suns: 1.0,
        }
    }
}

impl SimulatedCell {
    /// Default cell scaled to `area` under `suns` illumination.
    pub fn new(area: f64, suns: f64) -> Self {
        Self {
            area,
            suns,
            ..Self::default()
        }
    }

    /// Terminal current (A) at `voltage`, with or without illumination.
    pub fn current(&self, voltage: f64, illuminated: bool) -> f64 {
        let photo = if illuminated { self.jsc * self.suns } else { 0.0 };
        let diode = self.j0 * ((voltage / (self.ideality * THERMAL_VOLTAGE)).exp() - 1.0);
        let shunt = voltage / self.shunt_resistance * 1000.0;
        // mA/cm^2 -> A
        (diode + shunt - photo) * self.area / 1000.0
    }

    /// Open-circuit voltage under illumination, ignoring the shunt.
    pub fn open_circuit_voltage(&self) -> f64 {
        self.ideality * THERMAL_VOLTAGE * (self.jsc * self.suns / self.j0 + 1.0).ln()
    }

    /// Maximum power point `(voltage, power)` found on a 0.1 mV grid.
    pub fn max_power_point(&self) -> (f64, f64) {
        let voc = self.open_circuit_voltage();
        let steps = (voc / 1e-4).ceil() as usize;
        (0..=steps)
            .map(|k| {
                let v = k as f64 * 1e-4;
                (v, v * self.current(v, true))
            })
            .fold((0.0, 0.0), |best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            })
    }
}
