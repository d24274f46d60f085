//! Spectral estimation
//!
//! Welch power spectral density with a Hann window, trapezoidal band power,
//! and the neighbour-normalised SNR spectrum used for steady-state responses.

use crate::{Error, Result};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f64::consts::PI;

/// Default Welch segment length in samples
pub const DEFAULT_SEGMENT: usize = 2048;

/// One-sided power spectral density
#[derive(Debug, Clone, PartialEq)]
pub struct Psd {
    /// Bin centre frequencies in Hz
    pub freqs: Vec<f64>,
    /// Power density per bin (units² / Hz)
    pub power: Vec<f64>,
}

impl Psd {
    /// Frequency resolution (Hz per bin)
    #[must_use]
    pub fn resolution(&self) -> f64 {
        match self.freqs.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    /// Trapezoidal integral of the density over `[fmin, fmax]`
    pub fn band_power(&self, fmin: f64, fmax: f64) -> Result<f64> {
        let bins: Vec<(f64, f64)> = self
            .freqs
            .iter()
            .zip(&self.power)
            .filter(|(f, _)| **f >= fmin && **f <= fmax)
            .map(|(f, p)| (*f, *p))
            .collect();
        if bins.len() < 2 {
            return Err(Error::numeric(
                "band_power",
                format!("fewer than two bins in {fmin:.2}-{fmax:.2} Hz"),
            ));
        }
        Ok(bins
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
            .sum())
    }
}

/// Periodic Hann window
#[must_use]
pub fn hann_window(size: usize) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// Welch estimator with a reusable FFT plan
pub struct Welch {
    segment: usize,
    overlap: usize,
    sample_rate: f64,
    window: Vec<f64>,
    fft: std::sync::Arc<dyn rustfft::Fft<f64>>,
}

impl Welch {
    /// Create an estimator
    ///
    /// * `segment` - samples per segment
    /// * `overlap` - samples shared by consecutive segments
    pub fn new(segment: usize, overlap: usize, sample_rate: f64) -> Result<Self> {
        if segment < 2 {
            return Err(Error::parameter("segment", "must be at least 2 samples"));
        }
        if overlap >= segment {
            return Err(Error::parameter("overlap", "must be smaller than the segment"));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(Error::parameter("sample_rate", "must be positive"));
        }
        let fft = FftPlanner::new().plan_fft_forward(segment);
        Ok(Self {
            segment,
            overlap,
            sample_rate,
            window: hann_window(segment),
            fft,
        })
    }

    /// Frequency of every one-sided bin
    #[must_use]
    pub fn freqs(&self) -> Vec<f64> {
        let df = self.sample_rate / self.segment as f64;
        (0..=self.segment / 2).map(|k| k as f64 * df).collect()
    }

    /// Density-scaled PSD averaged over all full segments
    pub fn psd(&self, signal: &[f64]) -> Result<Psd> {
        if signal.len() < self.segment {
            return Err(Error::numeric(
                "welch",
                format!("{} samples for a {}-sample segment", signal.len(), self.segment),
            ));
        }
        if signal.iter().any(|v| !v.is_finite()) {
            return Err(Error::numeric("welch", "non-finite samples"));
        }
        let step = self.segment - self.overlap;
        let n_bins = self.segment / 2 + 1;
        let scale = 1.0 / (self.sample_rate * self.window.iter().map(|w| w * w).sum::<f64>());

        let mut acc = vec![0.0; n_bins];
        let mut buf = vec![Complex::new(0.0, 0.0); self.segment];
        let mut n_segments = 0usize;
        let mut start = 0;
        while start + self.segment <= signal.len() {
            let seg = &signal[start..start + self.segment];
            let mean = seg.iter().sum::<f64>() / seg.len() as f64;
            for ((dst, &x), &w) in buf.iter_mut().zip(seg).zip(&self.window) {
                *dst = Complex::new((x - mean) * w, 0.0);
            }
            self.fft.process(&mut buf);
            for (k, a) in acc.iter_mut().enumerate() {
                let mut p = buf[k].norm_sqr() * scale;
                let is_nyquist = self.segment % 2 == 0 && k == n_bins - 1;
                if k != 0 && !is_nyquist {
                    p *= 2.0;
                }
                *a += p;
            }
            n_segments += 1;
            start += step;
        }
        let power = acc.into_iter().map(|p| p / n_segments as f64).collect();
        Ok(Psd {
            freqs: self.freqs(),
            power,
        })
    }
}

/// Welch PSD with non-overlapping segments of at most [`DEFAULT_SEGMENT`] samples
pub fn welch(signal: &[f64], sample_rate: f64) -> Result<Psd> {
    let segment = signal.len().min(DEFAULT_SEGMENT);
    Welch::new(segment, 0, sample_rate)?.psd(signal)
}

/// Signal-to-noise spectrum: each bin divided by the mean of its neighbours
///
/// Neighbours are `n_neighbors` bins on each side after skipping `skip`
/// adjacent bins. Bins whose neighbourhood leaves the spectrum are NaN.
#[must_use]
pub fn snr_spectrum(power: &[f64], n_neighbors: usize, skip: usize) -> Vec<f64> {
    let reach = n_neighbors + skip;
    (0..power.len())
        .map(|i| {
            if n_neighbors == 0 || i < reach || i + reach >= power.len() {
                return f64::NAN;
            }
            let left = &power[i - reach..i - skip];
            let right = &power[i + skip + 1..=i + reach];
            let mean = (left.iter().sum::<f64>() + right.iter().sum::<f64>())
                / (2 * n_neighbors) as f64;
            power[i] / mean
        })
        .collect()
}
