//! Three-phase maximum-power-point tracker.
//!
//! A run has a fixed shape:
//!
//! 1. **Dark baseline**: shutter closed, 0 V, output on. Sample until
//!    `dark_duration` has elapsed.
//! 2. **Seed bracket**: shutter open. Exactly two samples at
//!    `seed ± bracket_step` give the first finite difference.
//! 3. **Tracking**: steepest descent on measured power until
//!    `dark_duration + track_duration` has elapsed.
//!
//! Whatever happens in between, the instrument is left with its output off,
//! its shutter closed and its display on. A failure during a phase still runs
//! that cleanup and surfaces as [`MpptError::Aborted`] with the samples
//! collected so far.
//!
//! The tracker awaits every instrument call in sequence. Nothing is spawned,
//! so a run needs no more than a current-thread runtime.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::{AppResult, MpptError};
use crate::instrument::SourceMeter;
use crate::measurement::{Sample, Trace};

pub mod config;
pub mod gradient;

pub use config::TrackerConfig;
pub use gradient::{Gradient, GradientState, OperatingPoint};

/// Drives one tracking run on a borrowed [`SourceMeter`].
///
/// The randomness used for degenerate gradients comes from `R`, so tests can
/// inject a seeded generator and get reproducible voltage sequences.
pub struct PowerTracker<'a, S: SourceMeter + ?Sized, R: Rng = StdRng> {
    instrument: &'a mut S,
    config: TrackerConfig,
    rng: R,
}

impl<'a, S: SourceMeter + ?Sized> PowerTracker<'a, S, StdRng> {
    /// Tracker with an entropy-seeded generator.
    pub fn new(instrument: &'a mut S, config: TrackerConfig) -> Self {
        Self::with_rng(instrument, config, StdRng::from_entropy())
    }
}

impl<'a, S: SourceMeter + ?Sized, R: Rng> PowerTracker<'a, S, R> {
    /// Tracker drawing perturbation directions from `rng`.
    pub fn with_rng(instrument: &'a mut S, config: TrackerConfig, rng: R) -> Self {
        Self {
            instrument,
            config,
            rng,
        }
    }

    /// Run all three phases and return the complete trace.
    ///
    /// # Errors
    ///
    /// - [`MpptError::Configuration`] if the config is invalid (instrument untouched)
    /// - [`MpptError::ConfigureFailed`] if setup fails (no samples taken)
    /// - [`MpptError::Aborted`] if a phase fails (cleanup already attempted)
    /// - [`MpptError::ShutdownFailed`] if the run completed but cleanup did not
    pub async fn run(mut self) -> AppResult<Trace> {
        self.config.validate()?;

        match self.instrument.identify().await {
            Ok(id) => info!("Connected to source-meter: {}", id.trim()),
            Err(e) => warn!("Could not identify source-meter: {}", e),
        }

        if let Err(e) = self.instrument.configure(&self.config.source).await {
            error!("Source-meter configuration failed: {}", e);
            if let Err(off) = self.instrument.set_output_enabled(false).await {
                warn!("Failed to disable output after configuration error: {}", off);
            }
            return Err(MpptError::ConfigureFailed(Box::new(e)));
        }

        info!(
            seed_voltage = self.config.seed_voltage,
            dark_s = self.config.dark_duration.as_secs_f64(),
            track_s = self.config.track_duration.as_secs_f64(),
            area = self.config.device_area,
            suns = self.config.suns,
            "Starting maximum power point tracking"
        );

        let mut trace = Trace::new();
        let outcome = self.run_phases(&mut trace).await;
        let shutdown = self.shutdown().await;

        match (outcome, shutdown) {
            (Ok(()), Ok(())) => {
                info!(samples = trace.len(), "Tracking complete");
                Ok(trace)
            }
            (Ok(()), Err(errors)) => {
                error!("Tracking completed but instrument shutdown failed");
                Err(MpptError::ShutdownFailed(errors))
            }
            (Err(source), shutdown) => {
                if let Err(errors) = shutdown {
                    for e in &errors {
                        warn!("Cleanup after aborted run failed: {}", e);
                    }
                }
                error!(samples = trace.len(), "Tracking aborted: {}", source);
                Err(MpptError::Aborted {
                    partial: trace,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn run_phases(&mut self, trace: &mut Trace) -> AppResult<()> {
        let clock = Instant::now();
        self.dark_baseline(clock, trace).await?;
        let state = self.seed_bracket(clock, trace).await?;
        self.track(clock, state, trace).await
    }

    /// Phase 1. Always yields at least one sample.
    async fn dark_baseline(&mut self, clock: Instant, trace: &mut Trace) -> AppResult<()> {
        info!("Measuring dark baseline");
        self.instrument.set_shutter_open(false).await?;
        self.instrument.set_voltage(0.0).await?;
        self.instrument.set_output_enabled(true).await?;

        loop {
            let time = clock.elapsed().as_secs_f64();
            self.sample(time, trace).await?;
            if clock.elapsed() >= self.config.dark_duration {
                break;
            }
        }
        info!(samples = trace.len(), "Dark baseline done");
        Ok(())
    }

    /// Phase 2. Two points either side of the seed, never at the seed itself.
    async fn seed_bracket(&mut self, clock: Instant, trace: &mut Trace) -> AppResult<GradientState> {
        info!("Opening shutter and bracketing seed voltage");
        self.instrument.set_shutter_open(true).await?;

        let seed = self.config.seed_voltage;
        let step = self.config.bracket_step;
        let low = self.sample_at(clock, seed - step, trace).await?;
        let high = self.sample_at(clock, seed + step, trace).await?;
        Ok(GradientState::new(
            OperatingPoint::from(&low),
            OperatingPoint::from(&high),
        ))
    }

    /// Phase 3. Steepest descent on signed power.
    async fn track(
        &mut self,
        clock: Instant,
        mut state: GradientState,
        trace: &mut Trace,
    ) -> AppResult<()> {
        info!(samples = trace.len(), "Seed bracket done, tracking");
        let deadline = self.config.total_duration();
        let start = trace.len();
        while clock.elapsed() < deadline {
            let gradient = state.estimate(self.config.random_perturbation_magnitude, &mut self.rng);
            if let Gradient::Perturbation(g) = gradient {
                trace!(voltage = state.latest().voltage, "Repeated voltage, perturbing by {}", g);
            }
            let next = state.next_voltage(self.config.learning_rate, gradient);
            debug!(commanded = next, gradient = gradient.value(), "Step");
            let sample = self.sample_at(clock, next, trace).await?;
            state.push(OperatingPoint::from(&sample));
        }
        info!(steps = trace.len() - start, "Tracking phase done");
        Ok(())
    }

    /// Command `voltage` then measure. The sample is stamped before the command.
    async fn sample_at(&mut self, clock: Instant, voltage: f64, trace: &mut Trace) -> AppResult<Sample> {
        let time = clock.elapsed().as_secs_f64();
        self.instrument.set_voltage(voltage).await?;
        self.sample(time, trace).await
    }

    async fn sample(&mut self, time: f64, trace: &mut Trace) -> AppResult<Sample> {
        let reading = self.instrument.measure().await?;
        let sample = Sample::from_reading(time, reading, self.config.device_area, self.config.suns);
        trace.push(sample);
        Ok(sample)
    }

    /// Output off, shutter closed, display on. Every step is attempted.
    async fn shutdown(&mut self) -> Result<(), Vec<MpptError>> {
        info!("Returning source-meter to safe state");
        let mut errors = Vec::new();

        if let Err(e) = self.instrument.set_output_enabled(false).await {
            warn!("Failed to disable output: {}", e);
            errors.push(e);
        }
        if let Err(e) = self.instrument.set_shutter_open(false).await {
            warn!("Failed to close shutter: {}", e);
            errors.push(e);
        }
        if let Err(e) = self.instrument.set_display_enabled(true).await {
            warn!("Failed to re-enable display: {}", e);
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
