//! Error types for the artifact cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Failure reading, writing or configuring the artifact cache
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Filesystem failure on an artifact, sidecar or cache directory
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(eegflow::cache::io),
        help("Check file permissions and ensure the cache root is writable")
    )]
    Io {
        /// Underlying error
        #[source]
        source: std::io::Error,
        /// File or directory involved
        path: Option<Box<Path>>,
        /// What was being done, e.g. "quarantine" or "create stage dir"
        operation: String,
    },

    /// No usable cache root, or an invalid pipeline version stamp
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(eegflow::cache::config))]
    Configuration {
        /// Human-readable cause
        message: String,
    },

    /// Artifact bytes are present but cannot be decoded
    #[error("Corrupt artifact: {reason}")]
    #[diagnostic(
        code(eegflow::cache::corrupt),
        help("Corrupt artifacts are quarantined with a .bad suffix and rebuilt on the next request")
    )]
    Corrupt {
        /// What failed while decoding
        reason: String,
    },

    /// Payload could not be encoded, or a label sidecar is not valid JSON
    #[error("Serialization error: {message}")]
    #[diagnostic(code(eegflow::cache::serialization))]
    Serialization {
        /// Encoder message
        message: String,
    },
}

impl Error {
    /// Configuration failure with `msg`
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Filesystem failure on `path`
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

    /// Undecodable artifact
    #[must_use]
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    /// Encoding failure with `msg`
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether the error means "bytes on disk are unusable" (quarantine-worthy)
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Cache result alias
pub type Result<T> = std::result::Result<T, Error>;
