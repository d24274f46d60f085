//! Error types for signal operations

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for buffer construction and numeric passes
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Array dimensions disagree with the declared channel layout
    #[error("Shape mismatch: {message}")]
    #[diagnostic(code(eegflow::signal::shape))]
    Shape {
        /// What disagreed
        message: String,
    },

    /// Referenced channel does not exist
    #[error("Unknown channel '{name}'")]
    #[diagnostic(
        code(eegflow::signal::channel),
        help("Channel names follow the montage, e.g. E69 for electrode 69")
    )]
    UnknownChannel {
        /// Requested channel name
        name: String,
    },

    /// Buffers that must share a layout do not
    #[error("Incompatible inputs: {message}")]
    #[diagnostic(code(eegflow::signal::incompatible))]
    Incompatible {
        /// What differs between the inputs
        message: String,
    },

    /// Parameter outside its valid range
    #[error("Invalid parameter {name}: {message}")]
    #[diagnostic(code(eegflow::signal::parameter))]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Why it was rejected
        message: String,
    },

    /// Numeric routine could not produce a result
    #[error("Numeric failure in {operation}: {message}")]
    #[diagnostic(code(eegflow::signal::numeric))]
    Numeric {
        /// Routine that failed
        operation: &'static str,
        /// Failure detail
        message: String,
    },

    /// Operation needs at least one input
    #[error("No input to {operation}")]
    #[diagnostic(code(eegflow::signal::empty))]
    Empty {
        /// Operation that received nothing
        operation: &'static str,
    },
}

impl Error {
    /// Create a shape error
    #[must_use]
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape {
            message: msg.into(),
        }
    }

    /// Create an incompatibility error
    #[must_use]
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::Incompatible {
            message: msg.into(),
        }
    }

    /// Create an invalid-parameter error
    #[must_use]
    pub fn parameter(name: &'static str, msg: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: msg.into(),
        }
    }

    /// Create a numeric failure
    #[must_use]
    pub fn numeric(operation: &'static str, msg: impl Into<String>) -> Self {
        Self::Numeric {
            operation,
            message: msg.into(),
        }
    }
}

/// Result type for signal operations
pub type Result<T> = std::result::Result<T, Error>;
