//! Core library for the `mppt` solar-cell tracker.
//!
//! This library contains the source-meter capability trait, the Keithley 2400
//! driver and its bus transports, the three-phase maximum-power-point tracker
//! and the trace file format. The `mppt` binary is a thin CLI over it.

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod storage;
pub mod tracker;

pub use error::{AppResult, MpptError};
pub use tracker::{PowerTracker, TrackerConfig};
