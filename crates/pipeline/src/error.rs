//! Error types for pipeline execution

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for loading inputs and running pipeline stages
///
/// Expected "no data" conditions (unsupported task, no events, unknown
/// condition) are not errors; see [`Outcome`](crate::Outcome).
#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    /// Cache key derivation or cache maintenance failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] eegflow_cache::Error),

    /// A numeric pass rejected its input
    #[error(transparent)]
    #[diagnostic(transparent)]
    Signal(#[from] eegflow_signal::Error),

    /// I/O error while reading recordings or parameter files
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(eegflow::pipeline::io),
        help("Check that the data root follows the BIDS layout <root>/<subject>/eeg/")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read header", "read events")
        operation: String,
    },

    /// An input file exists but cannot be parsed
    #[error("Malformed {}: {message}", path.display())]
    #[diagnostic(code(eegflow::pipeline::format))]
    Format {
        /// File being parsed
        path: Box<Path>,
        /// What was wrong
        message: String,
    },

    /// Parameter object failed validation
    #[error("Invalid parameters: {message}")]
    #[diagnostic(
        code(eegflow::pipeline::params),
        help("Unknown fields are rejected; see FilterParams/EpochParams/EvokedParams for accepted keys")
    )]
    Params {
        /// Validation failure
        message: String,
    },

    /// The request was cancelled between stages
    #[error("Cancelled before stage '{stage}'")]
    #[diagnostic(code(eegflow::pipeline::cancelled))]
    Cancelled {
        /// Stage that was about to run
        stage: &'static str,
    },

    /// No session with the given id
    #[error("Session '{id}' not found")]
    #[diagnostic(code(eegflow::pipeline::session))]
    SessionNotFound {
        /// Requested id
        id: String,
    },

    /// The blocking worker running a request panicked or was aborted
    #[error("Pipeline worker failed: {message}")]
    #[diagnostic(code(eegflow::pipeline::worker))]
    Worker {
        /// Join failure description
        message: String,
    },
}

impl PipelineError {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a parse error for `path`
    #[must_use]
    pub fn format(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.as_ref().into(),
            message: message.into(),
        }
    }

    /// Create a parameter validation error
    #[must_use]
    pub fn params(message: impl Into<String>) -> Self {
        Self::Params {
            message: message.into(),
        }
    }

    /// Whether the request stopped because of cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
