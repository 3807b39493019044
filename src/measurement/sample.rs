//! Samples and traces.

use serde::{Deserialize, Serialize};

/// One combined voltage/current read from the source-meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Measured voltage in V
    pub voltage: f64,
    /// Measured current in A (negative while the cell generates)
    pub current: f64,
}

impl Reading {
    /// Reading of `voltage` volts and `current` amps.
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }
}

/// A single point of the tracking time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the run started
    pub time: f64,
    /// V
    pub voltage: f64,
    /// A
    pub current: f64,
    /// mA/cm^2
    pub current_density: f64,
    /// W
    pub power: f64,
    /// Power conversion efficiency in %
    pub efficiency: f64,
}

impl Sample {
    /// Derive a sample from a raw reading.
    ///
    /// Efficiency compares the output power density against the input of
    /// `suns` × 100 mW/cm². It is computed from `|power|` for every reading,
    /// including those taken in the dark, where the value carries no physical
    /// meaning but keeps the file schema uniform.
    pub fn from_reading(time: f64, reading: Reading, area: f64, suns: f64) -> Self {
        let Reading { voltage, current } = reading;
        let power = voltage * current;
        Self {
            time,
            voltage,
            current,
            current_density: current * 1000.0 / area,
            power,
            efficiency: power.abs() * 1000.0 * 100.0 / (100.0 * suns * area),
        }
    }

    /// Columns in file order.
    pub fn columns(&self) -> [f64; 6] {
        [
            self.time,
            self.voltage,
            self.current,
            self.current_density,
            self.power,
            self.efficiency,
        ]
    }

    /// Inverse of [`Sample::columns`].
    pub fn from_columns(columns: [f64; 6]) -> Self {
        let [time, voltage, current, current_density, power, efficiency] = columns;
        Self {
            time,
            voltage,
            current,
            current_density,
            power,
            efficiency,
        }
    }
}

/// Append-only, wall-clock ordered sequence of samples from one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    samples: Vec<Sample>,
}

impl Trace {
    /// Empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Times must not decrease.
    pub fn push(&mut self, sample: Sample) {
        debug_assert!(
            self.samples.last().map_or(true, |last| sample.time >= last.time),
            "trace time went backwards"
        );
        self.samples.push(sample);
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been taken.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// All samples in acquisition order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Iterate in acquisition order.
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Take ownership of the samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Elapsed time of the last sample, or zero for an empty trace.
    pub fn duration(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.time)
    }
}

impl From<Vec<Sample>> for Trace {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        let reading = Reading::new(0.55, -0.0021);
        let area = 0.0935;
        let suns = 1.0;
        let sample = Sample::from_reading(1.25, reading, area, suns);

        assert_eq!(sample.time, 1.25);
        assert_eq!(sample.power, 0.55 * -0.0021);
        assert_eq!(sample.current_density, -0.0021 * 1000.0 / area);
        assert_eq!(
            sample.efficiency,
            (0.55_f64 * -0.0021).abs() * 1000.0 * 100.0 / (100.0 * suns * area)
        );
        assert!(sample.efficiency > 0.0);
    }

    #[test]
    fn test_efficiency_scales_with_suns() {
        let reading = Reading::new(0.6, -0.002);
        let one_sun = Sample::from_reading(0.0, reading, 0.1, 1.0);
        let half_sun = Sample::from_reading(0.0, reading, 0.1, 0.5);
        assert!((half_sun.efficiency - 2.0 * one_sun.efficiency).abs() < 1e-12);
    }

    #[test]
    fn test_dark_sample_has_nonnegative_efficiency() {
        // Forward leakage in the dark gives positive power; the column stays |P|-based.
        let sample = Sample::from_reading(0.0, Reading::new(0.0001, 2e-9), 0.0935, 1.0);
        assert!(sample.efficiency >= 0.0);
        assert!(sample.power > 0.0);
    }

    #[test]
    fn test_columns_preserve_order() {
        let sample = Sample::from_reading(2.0, Reading::new(0.5, -0.01), 0.1, 1.0);
        let cols = sample.columns();
        assert_eq!(cols[0], 2.0);
        assert_eq!(cols[1], 0.5);
        assert_eq!(cols[2], -0.01);
        assert_eq!(Sample::from_columns(cols), sample);
    }

    #[test]
    fn test_trace_append_only() {
        let mut trace = Trace::new();
        assert!(trace.is_empty());
        assert_eq!(trace.duration(), 0.0);

        for i in 0..3 {
            trace.push(Sample::from_reading(i as f64 * 0.5, Reading::new(0.1, -0.01), 0.1, 1.0));
        }
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.last().map(|s| s.time), Some(1.0));
        assert_eq!(trace.duration(), 1.0);
        assert_eq!(trace.iter().count(), 3);

        let samples = trace.clone().into_samples();
        assert_eq!(Trace::from(samples), trace);
    }
}
