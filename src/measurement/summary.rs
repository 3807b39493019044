//! Stabilization figures over the tail of a trace.
//!
//! A tracked cell is judged by how its output settles: the operator looks at
//! bias, |J| and PCE against time and reads off the level they converge to.
//! [`StabilizationSummary`] condenses that tail into a few numbers that can be
//! logged next to the written trace.

use std::time::Duration;

use serde::Serialize;

use super::Trace;

/// Figures of merit over the trailing window of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilizationSummary {
    /// Samples inside the window
    pub samples: usize,
    /// Mean bias over the window (V)
    pub mean_voltage: f64,
    /// Mean |J| over the window (mA/cm^2)
    pub mean_abs_current_density: f64,
    /// Mean PCE over the window (%)
    pub mean_efficiency: f64,
    /// Highest PCE seen in the window (%)
    pub peak_efficiency: f64,
    /// PCE at the end of the window minus PCE at its start (%)
    pub efficiency_drift: f64,
}

impl StabilizationSummary {
    /// Summarize the samples whose time falls within `window` of the last sample.
    ///
    /// Returns `None` for an empty trace.
    pub fn from_trace(trace: &Trace, window: Duration) -> Option<Self> {
        let end = trace.last()?.time;
        let start = end - window.as_secs_f64();

        let tail: Vec<_> = trace.iter().filter(|s| s.time >= start).collect();
        let first = tail.first()?;
        let last = tail.last()?;
        let n = tail.len() as f64;

        let mean = |f: fn(&super::Sample) -> f64| tail.iter().map(|s| f(*s)).sum::<f64>() / n;

        Some(Self {
            samples: tail.len(),
            mean_voltage: mean(|s| s.voltage),
            mean_abs_current_density: mean(|s| s.current_density.abs()),
            mean_efficiency: mean(|s| s.efficiency),
            peak_efficiency: tail
                .iter()
                .map(|s| s.efficiency)
                .fold(f64::NEG_INFINITY, f64::max),
            efficiency_drift: last.efficiency - first.efficiency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Reading, Sample};

    fn trace_with(points: &[(f64, f64, f64)]) -> Trace {
        points
            .iter()
            .map(|&(t, v, i)| Sample::from_reading(t, Reading::new(v, i), 0.1, 1.0))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_empty_trace_has_no_summary() {
        assert!(StabilizationSummary::from_trace(&Trace::new(), Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_window_selects_tail() {
        let trace = trace_with(&[
            (0.0, 0.0, 0.0),
            (1.0, 0.5, -0.001),
            (9.0, 0.6, -0.002),
            (10.0, 0.6, -0.002),
        ]);

        let summary = StabilizationSummary::from_trace(&trace, Duration::from_secs(2)).unwrap();
        assert_eq!(summary.samples, 2);
        assert!((summary.mean_voltage - 0.6).abs() < 1e-12);
        assert!((summary.mean_abs_current_density - 20.0).abs() < 1e-9);
        // 0.6 V * 2 mA over 0.1 cm^2 at 1 sun = 12 %
        assert!((summary.mean_efficiency - 12.0).abs() < 1e-9);
        assert!(summary.efficiency_drift.abs() < 1e-12);
    }

    #[test]
    fn test_drift_and_peak() {
        let trace = trace_with(&[(0.0, 0.5, -0.002), (1.0, 0.6, -0.002), (2.0, 0.55, -0.002)]);

        let summary = StabilizationSummary::from_trace(&trace, Duration::from_secs(60)).unwrap();
        assert_eq!(summary.samples, 3);
        assert!((summary.peak_efficiency - 12.0).abs() < 1e-9);
        assert!((summary.efficiency_drift - 1.0).abs() < 1e-9);
    }
}
