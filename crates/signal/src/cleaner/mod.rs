//! Statistical artifact marking
//!
//! [`SignalCleaner`] runs the prefilter chain (band-pass, resample, notch) and
//! the marking detectors in a fixed order:
//!
//! 1. flatline channels
//! 2. high-frequency noise channels
//! 3. low-correlation channels
//! 4. artifact subspace reconstruction
//! 5. bad windows by power
//!
//! Every detector takes ownership of the buffer and hands it back with any
//! new bad channels or annotations added, so later detectors see the state
//! left by earlier ones. A detector whose threshold is unset or non-positive
//! is skipped. Detectors only look at good EEG channels and omit samples
//! under `bad*` annotations, except ASR which needs contiguous data.

mod asr;
mod correlation;
mod flatline;
mod hf_noise;
mod power;

pub use asr::{AsrModel, apply_asr};
pub use correlation::mark_lowcorr_channels;
pub use flatline::mark_flatline_channels;
pub use hf_noise::{HF_BAND, mark_hf_noise_channels};
pub use power::{DEFAULT_OUTBOUND_PCT, flag_windows, mark_bad_windows_by_power};

use crate::buffer::TimeSeriesBuffer;
use crate::{Result, filter, resample};
use std::time::Instant;

/// Band-pass, resample and notch settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// High-pass edge in Hz
    pub l_freq: Option<f64>,
    /// Low-pass edge in Hz
    pub h_freq: Option<f64>,
    /// Line-noise frequency to notch out
    pub notch: Option<f64>,
    /// Target sampling rate in Hz
    pub resample_fs: Option<f64>,
}

/// Detector thresholds; `None` disables the detector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CleaningSettings {
    /// Seconds a channel must stay constant to count as flat
    pub flatline_sec: Option<f64>,
    /// Z-score above which high-frequency band power marks a channel
    pub hf_noise_sd_max: Option<f64>,
    /// Minimum correlation with the median trace, in `(0, 1]`
    pub corr_min: Option<f64>,
    /// ASR cutoff in standard deviations
    pub asr_max_std: Option<f64>,
    /// Annotate ASR residual windows instead of reconstructing
    pub asr_remove_only: bool,
    /// Lower z bound of per-window power
    pub power_min_sd: Option<f64>,
    /// Upper z bound of per-window power
    pub power_max_sd: Option<f64>,
    /// Percentage of out-of-bound channels above which a window is bad
    pub max_outbound_pct: Option<f64>,
    /// Window length in seconds for power windows and ASR
    pub window_sec: Option<f64>,
}

/// `Some(v)` when the threshold is set and positive
pub(crate) fn enabled(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Stateless entry points of the cleaning pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCleaner;

impl SignalCleaner {
    /// Band-pass, then resample when the rate differs, then notch
    pub fn prefilter(buffer: TimeSeriesBuffer, settings: &FilterSettings) -> Result<TimeSeriesBuffer> {
        let t0 = Instant::now();
        tracing::info!(
            l_freq = ?settings.l_freq,
            h_freq = ?settings.h_freq,
            resample_fs = ?settings.resample_fs,
            notch = ?settings.notch,
            "[prefilter] start"
        );
        let mut buffer = filter::band_pass(buffer, settings.l_freq, settings.h_freq)?;
        if let Some(target) = enabled(settings.resample_fs) {
            buffer = resample::resample(buffer, target)?;
        }
        if let Some(freq) = enabled(settings.notch) {
            buffer = filter::notch(buffer, freq);
        }
        tracing::info!(
            sfreq = buffer.sfreq(),
            elapsed_ms = t0.elapsed().as_millis(),
            "[prefilter] done"
        );
        Ok(buffer)
    }

    /// Run every marking detector in order
    pub fn clean_mark(buffer: TimeSeriesBuffer, settings: &CleaningSettings) -> Result<TimeSeriesBuffer> {
        let t0 = Instant::now();
        tracing::info!("[clean_mark] start");
        let buffer = mark_flatline_channels(buffer, settings)?;
        let buffer = mark_hf_noise_channels(buffer, settings)?;
        let buffer = mark_lowcorr_channels(buffer, settings)?;
        let buffer = apply_asr(buffer, settings)?;
        let buffer = mark_bad_windows_by_power(buffer, settings)?;
        tracing::info!(
            bads = ?buffer.bads(),
            annotations = buffer.annotations().len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "[clean_mark] done"
        );
        Ok(buffer)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{buffer_from, noise};
    use super::*;

    #[test]
    fn test_all_disabled_is_identity() {
        let buf = buffer_from((0..4).map(|c| noise(c, 500)).collect(), 100.0);
        let out = SignalCleaner::clean_mark(buf.clone(), &CleaningSettings::default()).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn test_prefilter_resamples_and_records_passband() {
        let buf = buffer_from((0..3).map(|c| noise(c, 2000)).collect(), 500.0);
        let settings = FilterSettings {
            l_freq: Some(4.0),
            h_freq: Some(30.0),
            notch: Some(60.0),
            resample_fs: Some(100.0),
        };
        let out = SignalCleaner::prefilter(buf, &settings).unwrap();
        assert!((out.sfreq() - 100.0).abs() < 1e-12);
        assert_eq!(out.n_samples(), 400);
        assert!((out.highpass() - 4.0).abs() < 1e-12);
        assert!((out.lowpass() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_detectors_compose() {
        // E1 flat, E5 wildly noisy at high frequency: flatline runs first, so
        // the hf detector only z-scores the remaining channels.
        let mut rows: Vec<Vec<f64>> = (0..6).map(|c| noise(c, 3000)).collect();
        rows[0] = vec![0.0; 3000];
        rows[4] = noise(99, 3000).iter().map(|v| v * 40.0).collect();
        let buf = buffer_from(rows, 250.0);
        let settings = CleaningSettings {
            flatline_sec: Some(1.0),
            hf_noise_sd_max: Some(1.5),
            ..CleaningSettings::default()
        };
        let out = SignalCleaner::clean_mark(buf, &settings).unwrap();
        assert!(out.is_bad("E1"));
        assert!(out.is_bad("E5"));
        assert_eq!(out.bads().len(), 2);
    }
}
