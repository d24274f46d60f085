//! Multichannel EEG signal processing for the eegflow pipeline
//!
//! This crate holds the in-memory data model and the numeric passes that run
//! between cache stages:
//! - [`TimeSeriesBuffer`]: channels × samples with sampling rate, channel
//!   metadata, bad channels and annotations
//! - Zero-phase band-pass and notch filtering, FFT resampling
//! - Welch spectra and band power
//! - [`SignalCleaner`]: the ordered bad-channel and bad-window detectors
//! - [`EpochCollection`] and [`AveragedResponse`] with baseline correction,
//!   condition selection and spherical-spline interpolation of bad channels
//!
//! Passes that modify a buffer take it by value and hand back the result, so
//! ownership makes the data flow between stages explicit.
//!
//! ```
//! use eegflow_signal::{ChannelInfo, CleaningSettings, SignalCleaner, TimeSeriesBuffer};
//! use ndarray::Array2;
//!
//! # fn main() -> eegflow_signal::Result<()> {
//! let data = Array2::from_shape_fn((2, 1000), |(c, t)| ((t * (c + 1)) as f64 * 0.1).sin());
//! let buffer = TimeSeriesBuffer::new(
//!     data,
//!     100.0,
//!     vec![ChannelInfo::eeg("E1"), ChannelInfo::eeg("E2")],
//! )?;
//! let settings = CleaningSettings {
//!     flatline_sec: Some(5.0),
//!     ..CleaningSettings::default()
//! };
//! let cleaned = SignalCleaner::clean_mark(buffer, &settings)?;
//! assert!(cleaned.bads().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cleaner;
pub mod epochs;
mod error;
pub mod filter;
pub mod interpolate;
pub mod resample;
pub mod spectral;
pub mod stats;

pub use buffer::{Annotation, BAD_PREFIX, ChannelInfo, ChannelKind, TimeSeriesBuffer};
pub use cleaner::{CleaningSettings, FilterSettings, SignalCleaner};
pub use epochs::{ALL_CONDITIONS, AveragedResponse, Baseline, EpochCollection, EpochEvent};
pub use error::{Error, Result};
pub use interpolate::Interpolation;
pub use spectral::{Psd, Welch};
