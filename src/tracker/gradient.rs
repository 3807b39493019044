//! Finite-difference gradient estimate for the steepest-descent step.
//!
//! Only the two most recent operating points are ever needed, so they are kept
//! in an explicit two-slot state instead of indexing back into the trace.

use rand::Rng;

use crate::measurement::Sample;

/// Measured (voltage, power) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingPoint {
    /// V
    pub voltage: f64,
    /// Signed power in W
    pub power: f64,
}

impl From<&Sample> for OperatingPoint {
    fn from(sample: &Sample) -> Self {
        Self {
            voltage: sample.voltage,
            power: sample.power,
        }
    }
}

/// How dP/dV was obtained for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gradient {
    /// Secant slope through the last two points
    Secant(f64),
    /// Random-signed fixed step used when the last two voltages coincide
    Perturbation(f64),
}

impl Gradient {
    /// dP/dV, whichever way it was obtained.
    pub fn value(self) -> f64 {
        match self {
            Self::Secant(g) | Self::Perturbation(g) => g,
        }
    }
}

/// The last two operating points, oldest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientState {
    previous: OperatingPoint,
    latest: OperatingPoint,
}

impl GradientState {
    /// State seeded with two points, `previous` measured first.
    pub fn new(previous: OperatingPoint, latest: OperatingPoint) -> Self {
        Self { previous, latest }
    }

    /// Older of the two points.
    pub fn previous(&self) -> OperatingPoint {
        self.previous
    }

    /// Most recent point.
    pub fn latest(&self) -> OperatingPoint {
        self.latest
    }

    /// Shift in a new point, dropping the oldest.
    pub fn push(&mut self, point: OperatingPoint) {
        self.previous = std::mem::replace(&mut self.latest, point);
    }

    /// Estimate dP/dV. Never divides by zero: equal voltages fall back to a
    /// perturbation of `perturbation` with a sign drawn from `rng`.
    pub fn estimate<R: Rng + ?Sized>(&self, perturbation: f64, rng: &mut R) -> Gradient {
        let dv = self.latest.voltage - self.previous.voltage;
        if self.latest.voltage != self.previous.voltage {
            Gradient::Secant((self.latest.power - self.previous.power) / dv)
        } else if rng.gen_bool(0.5) {
            Gradient::Perturbation(perturbation)
        } else {
            Gradient::Perturbation(-perturbation)
        }
    }

    /// Voltage to command next: `V_latest − learning_rate × dP/dV`.
    pub fn next_voltage(&self, learning_rate: f64, gradient: Gradient) -> f64 {
        self.latest.voltage - learning_rate * gradient.value()
    }
}
