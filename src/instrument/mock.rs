//! A mock source-meter that answers from a pluggable I-V model.
//!
//! Used by the tests and by `mppt --transport mock` for dry runs. It provides:
//! - Simulated round-trip latency (`tokio::time::sleep`, so paused test clocks
//!   advance deterministically)
//! - Optional current noise from a seeded RNG
//! - Failure injection on the Nth measurement, on configuration, or on the Nth
//!   occurrence of any output/shutter/display call
//! - A call log for test verification

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;
use tracing::info;

use super::{SimulatedCell, SourceMeter, SourceSettings};
use crate::error::AppResult;
use crate::measurement::Reading;

/// Maps (commanded voltage, shutter open) to a measured (voltage, current).
pub type ResponseModel = Box<dyn FnMut(f64, bool) -> Reading + Send>;

/// One operation seen by the mock, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// `configure`
    Configure,
    /// `set_output_enabled(on)`
    Output(bool),
    /// `set_shutter_open(open)`
    Shutter(bool),
    /// `set_display_enabled(on)`
    Display(bool),
    /// `set_voltage(v)`
    SetVoltage(f64),
    /// `measure`
    Measure,
}

/// In-process [`SourceMeter`] with scripted behaviour and a call log.
pub struct MockSourceMeter {
    model: ResponseModel,
    latency: Duration,
    noise: f64,
    rng: StdRng,
    commanded_voltage: f64,
    output_enabled: bool,
    shutter_open: bool,
    measurements: usize,
    fail_on_measure: Option<usize>,
    fail_on_configure: bool,
    failing_calls: Vec<(MockCall, usize)>,
    calls: Vec<MockCall>,
}

impl MockSourceMeter {
    /// Build a mock around an arbitrary response model.
    pub fn new(model: impl FnMut(f64, bool) -> Reading + Send + 'static) -> Self {
        Self {
            model: Box::new(model),
            latency: Duration::from_millis(10),
            noise: 0.0,
            rng: StdRng::seed_from_u64(0),
            commanded_voltage: 0.0,
            output_enabled: false,
            shutter_open: false,
            measurements: 0,
            fail_on_measure: None,
            fail_on_configure: false,
            failing_calls: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Echo the commanded voltage and return a fixed current.
    pub fn constant_current(current: f64) -> Self {
        Self::new(move |v, _| Reading::new(v, current))
    }

    /// Answer from a single-diode cell model. The shutter gates illumination.
    pub fn simulated_cell(cell: SimulatedCell) -> Self {
        Self::new(move |v, lit| Reading::new(v, cell.current(v, lit)))
    }

    /// Round-trip time of each `measure` call. Must be non-zero for the
    /// tracker's time-bounded phases to make progress on a paused clock.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add uniform current noise of ± `amplitude` amps.
    pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
        self.noise = amplitude;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Fail the `n`th call to `measure` (1-based).
    pub fn fail_on_measure(mut self, n: usize) -> Self {
        self.fail_on_measure = Some(n);
        self
    }

    /// Reject `configure`.
    pub fn fail_on_configure(mut self) -> Self {
        self.fail_on_configure = true;
        self
    }

    /// Fail the `occurrence`th (1-based) call equal to `call`. Meant for the
    /// output, shutter and display switches; the call is still logged.
    pub fn fail_call(mut self, call: MockCall, occurrence: usize) -> Self {
        self.failing_calls.push((call, occurrence));
        self
    }

    /// Every call seen so far, in order.
    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    /// Voltages passed to `set_voltage`, in order.
    pub fn commanded_voltages(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MockCall::SetVoltage(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Number of `measure` calls, failed ones included.
    pub fn measurements(&self) -> usize {
        self.measurements
    }

    /// Output state as last successfully commanded.
    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    /// Shutter state as last successfully commanded.
    pub fn shutter_open(&self) -> bool {
        self.shutter_open
    }

    /// Log `call` and fail it if it was scheduled to fail.
    fn record(&mut self, call: MockCall) -> AppResult<()> {
        self.calls.push(call.clone());
        let seen = self.calls.iter().filter(|c| **c == call).count();
        if self.failing_calls.contains(&(call.clone(), seen)) {
            return Err(anyhow!("Mock bus error on {:?} (occurrence {})", call, seen).into());
        }
        Ok(())
    }
}

#[async_trait]
impl SourceMeter for MockSourceMeter {
    async fn configure(&mut self, _settings: &SourceSettings) -> AppResult<()> {
        self.calls.push(MockCall::Configure);
        if self.fail_on_configure {
            return Err(anyhow!("Mock source-meter rejected configuration").into());
        }
        info!("Mock source-meter configured");
        Ok(())
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> AppResult<()> {
        self.record(MockCall::Output(enabled))?;
        self.output_enabled = enabled;
        Ok(())
    }

    async fn set_shutter_open(&mut self, open: bool) -> AppResult<()> {
        self.record(MockCall::Shutter(open))?;
        self.shutter_open = open;
        Ok(())
    }

    async fn set_voltage(&mut self, voltage: f64) -> AppResult<()> {
        self.calls.push(MockCall::SetVoltage(voltage));
        self.commanded_voltage = voltage;
        Ok(())
    }

    async fn measure(&mut self) -> AppResult<Reading> {
        self.calls.push(MockCall::Measure);
        self.measurements += 1;
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if self.fail_on_measure == Some(self.measurements) {
            return Err(anyhow!("Mock bus timeout on measurement {}", self.measurements).into());
        }

        let mut reading = (self.model)(self.commanded_voltage, self.shutter_open);
        if self.noise > 0.0 {
            reading.current += self.rng.gen_range(-self.noise..=self.noise);
        }
        Ok(reading)
    }

    async fn set_display_enabled(&mut self, enabled: bool) -> AppResult<()> {
        self.record(MockCall::Display(enabled))
    }

    async fn identify(&mut self) -> AppResult<String> {
        Ok("MOCK,SOURCEMETER,0,1.0".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_measure_echoes_commanded_voltage() {
        let mut smu = MockSourceMeter::constant_current(-0.01);
        smu.set_voltage(0.42).await.unwrap();
        let reading = smu.measure().await.unwrap();
        assert_eq!(reading, Reading::new(0.42, -0.01));
        assert_eq!(smu.measurements(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutter_gates_simulated_cell() {
        let mut smu = MockSourceMeter::simulated_cell(SimulatedCell::new(0.1, 1.0));
        let dark = smu.measure().await.unwrap();
        smu.set_shutter_open(true).await.unwrap();
        let lit = smu.measure().await.unwrap();
        assert_eq!(dark.current, 0.0);
        assert!(lit.current < 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_on_nth_measure() {
        let mut smu = MockSourceMeter::constant_current(0.0).fail_on_measure(2);
        assert!(smu.measure().await.is_ok());
        assert!(smu.measure().await.is_err());
        assert!(smu.measure().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_is_bounded_and_seeded() {
        let mut a = MockSourceMeter::constant_current(-0.01).with_noise(1e-4, 7);
        let mut b = MockSourceMeter::constant_current(-0.01).with_noise(1e-4, 7);
        for _ in 0..20 {
            let ra = a.measure().await.unwrap();
            let rb = b.measure().await.unwrap();
            assert_eq!(ra, rb);
            assert!((ra.current + 0.01).abs() <= 1e-4);
        }
    }

    #[tokio::test]
    async fn test_failing_call_is_logged_and_state_kept() {
        let mut smu = MockSourceMeter::constant_current(0.0).fail_call(MockCall::Shutter(false), 2);
        smu.set_shutter_open(false).await.unwrap();
        smu.set_shutter_open(true).await.unwrap();
        assert!(smu.set_shutter_open(false).await.is_err());
        assert!(smu.shutter_open());
        assert!(smu.set_shutter_open(false).await.is_ok());
        assert_eq!(smu.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_call_log() {
        let mut smu = MockSourceMeter::constant_current(0.0).with_latency(Duration::ZERO);
        smu.configure(&SourceSettings::default()).await.unwrap();
        smu.set_output_enabled(true).await.unwrap();
        smu.set_voltage(0.1).await.unwrap();
        smu.measure().await.unwrap();
        assert_eq!(
            smu.calls(),
            &[
                MockCall::Configure,
                MockCall::Output(true),
                MockCall::SetVoltage(0.1),
                MockCall::Measure
            ]
        );
        assert_eq!(smu.commanded_voltages(), vec![0.1]);
    }
}
