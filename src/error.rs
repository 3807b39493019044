//! Custom error types for the tracker.
//!
//! This module defines the primary error type, `MpptError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report everything
//! from settings problems to a source-meter that stops answering mid-run.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: the settings file failed to load, or loaded
//!   but holds values that make no physical sense (negative area, unknown transport).
//! - **`Io`** / **`Csv`**: writing or reading trace files.
//! - **`Transport`**: anything the bus adapters report (VISA status codes, serial
//!   timeouts). Adapters use `anyhow` internally; the context chain is preserved.
//! - **`MalformedResponse`**: the instrument answered, but not with what the command
//!   promises. Treated exactly like a communication failure.
//! - **`ConfigureFailed`**: the instrument could not be set up. No sample was taken.
//! - **`Aborted`**: a tracking run failed part-way. Carries the partial trace so the
//!   caller can decide whether to keep it; cleanup has already run.
//! - **`ShutdownFailed`**: the run finished but the instrument could not be put back
//!   into its safe state.
//!
//! A degenerate gradient (two equal voltages in a row) is not an error and never
//! produces one of these.

use thiserror::Error;

use crate::measurement::Trace;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, MpptError>;

/// Every failure the crate reports.
#[derive(Error, Debug)]
pub enum MpptError {
    /// A settings layer could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings parsed but are out of range.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Trace file could not be encoded or decoded.
    #[error("Trace file error: {0}")]
    Csv(#[from] csv::Error),

    /// Bus-level failure, including timeouts.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),

    /// The instrument answered `command` with something unusable.
    #[error("Malformed response to '{command}': {response:?}")]
    MalformedResponse {
        /// Command or query that was sent
        command: String,
        /// Raw reply
        response: String,
    },

    /// The adapter has no open session.
    #[error("Instrument not connected")]
    NotConnected,

    /// The transport was compiled out; holds the cargo feature name.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Instrument setup failed before any sample was taken.
    #[error("Instrument configuration failed: {0}")]
    ConfigureFailed(#[source] Box<MpptError>),

    /// A phase failed. Cleanup has already been attempted.
    #[error("Tracking aborted after {} samples: {source}", partial.len())]
    Aborted {
        /// Samples collected before the failure
        partial: Trace,
        /// What stopped the run
        #[source]
        source: Box<MpptError>,
    },

    /// The run completed but one or more cleanup steps failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<MpptError>),
}

impl MpptError {
    /// Samples collected before an aborted run failed, if this is an abort.
    pub fn partial_trace(&self) -> Option<&Trace> {
        match self {
            Self::Aborted { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Split an abort into its partial trace and root cause.
    pub fn into_partial(self) -> Result<(Trace, MpptError), MpptError> {
        match self {
            Self::Aborted { partial, source } => Ok((partial, *source)),
            other => Err(other),
        }
    }
}
