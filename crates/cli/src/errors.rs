//! CLI-specific errors with miette diagnostics
//!
//! Library errors already carry their own diagnostics and pass through
//! `miette::Report` unchanged; only argument and output problems live here.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Invalid command line argument: {argument}")]
    #[diagnostic(code(eegflow::cli::invalid_argument))]
    InvalidArgument {
        argument: String,
        #[help]
        suggestion: Option<String>,
    },

    #[error("Failed to render command output")]
    #[diagnostic(code(eegflow::cli::output))]
    Output {
        #[source]
        source: serde_json::Error,
    },
}

impl CliError {
    pub fn invalid_argument(argument: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(source: serde_json::Error) -> Self {
        Self::Output { source }
    }
}
