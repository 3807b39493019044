//! Measurement records produced by a tracking run.
//!
//! A [`Reading`] is what the source-meter hands back, a [`Sample`] is a reading
//! with its derived figures of merit and timestamp, and a [`Trace`] is the ordered
//! sequence of samples from one run.

pub mod sample;
pub mod summary;

pub use sample::{Reading, Sample, Trace};
pub use summary::StabilizationSummary;
