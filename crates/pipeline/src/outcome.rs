//! Typed "no data" results

use serde::Serialize;
use std::fmt;

/// Wire value reported for every unavailable result
pub const UNAVAILABLE: &str = "unavailable";

/// Why a request produced no artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unavailable {
    /// No epoch strategy is registered for the task
    UnsupportedTask {
        /// Task name as requested
        task: String,
    },
    /// The recording has no events the strategy can use
    NoEvents,
    /// Every event window fell outside the recording or onto a bad span
    EmptyEpochs,
    /// The requested condition does not occur in the epochs
    ConditionAbsent {
        /// Requested condition
        condition: String,
    },
}

impl Unavailable {
    /// The sentinel string reported to callers
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        UNAVAILABLE
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedTask { task } => write!(f, "no epoch strategy for task '{task}'"),
            Self::NoEvents => f.write_str("no usable events"),
            Self::EmptyEpochs => f.write_str("no epoch survived window and bad-span filtering"),
            Self::ConditionAbsent { condition } => write!(f, "condition '{condition}' not present"),
        }
    }
}

/// Result of a stage that may legitimately have nothing to return
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The artifact
    Ready(T),
    /// Nothing to return, and why
    Unavailable(Unavailable),
}

impl<T> Outcome<T> {
    /// The artifact, if any
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    /// Whether an artifact is present
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The reason nothing was produced
    #[must_use]
    pub const fn unavailable(&self) -> Option<&Unavailable> {
        match self {
            Self::Ready(_) => None,
            Self::Unavailable(reason) => Some(reason),
        }
    }

    /// Transform the artifact, keeping the reason otherwise
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Ready(value) => Outcome::Ready(f(value)),
            Self::Unavailable(reason) => Outcome::Unavailable(reason),
        }
    }
}

impl<T> From<Unavailable> for Outcome<T> {
    fn from(reason: Unavailable) -> Self {
        Self::Unavailable(reason)
    }
}
