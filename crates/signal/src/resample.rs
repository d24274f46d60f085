//! Fourier-domain resampling

use crate::buffer::TimeSeriesBuffer;
use crate::{Error, Result};
use ndarray::Array2;
use rayon::prelude::*;
use rustfft::{FftPlanner, num_complex::Complex};

/// Rates closer than this are treated as equal
pub const RATE_TOLERANCE: f64 = 1e-6;

/// Resample one trace to `n_out` samples by truncating or zero-padding its spectrum
#[must_use]
pub fn resample_trace(signal: &[f64], n_out: usize) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || n_out == 0 {
        return vec![0.0; n_out];
    }
    if n == n_out {
        return signal.to_vec();
    }

    let mut planner = FftPlanner::<f64>::new();
    let mut spectrum: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut spectrum);

    let m = n.min(n_out);
    let nyq = m / 2 + 1;
    let mut out = vec![Complex::new(0.0, 0.0); n_out];
    out[..nyq].copy_from_slice(&spectrum[..nyq]);
    if m > 2 {
        let tail = m - nyq;
        out[n_out - tail..].copy_from_slice(&spectrum[n - tail..]);
    }
    // Split or fold the Nyquist bin when the shorter length is even
    if m % 2 == 0 {
        if n_out < n {
            out[m / 2] += spectrum[n - m / 2];
        } else {
            out[m / 2] *= 0.5;
            out[n_out - m / 2] = out[m / 2];
        }
    }

    planner.plan_fft_inverse(n_out).process(&mut out);
    // rustfft leaves the inverse unnormalised
    let scale = 1.0 / n as f64;
    out.into_iter().map(|c| c.re * scale).collect()
}

/// Resample every row of the buffer to `target` Hz
///
/// A no-op when the rates already agree within [`RATE_TOLERANCE`].
/// Annotations are expressed in seconds and carry over unchanged.
pub fn resample(buffer: TimeSeriesBuffer, target: f64) -> Result<TimeSeriesBuffer> {
    if !(target.is_finite() && target > 0.0) {
        return Err(Error::parameter("resample_fs", format!("must be positive, got {target}")));
    }
    let current = buffer.sfreq();
    if (current - target).abs() <= RATE_TOLERANCE {
        return Ok(buffer);
    }
    let n = buffer.n_samples();
    let n_out = ((n as f64) * target / current).round() as usize;
    if n > 0 && n_out == 0 {
        return Err(Error::parameter(
            "resample_fs",
            format!("{target} Hz leaves no samples from {n} at {current} Hz"),
        ));
    }

    let rows: Vec<Vec<f64>> = buffer
        .data()
        .outer_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|row| resample_trace(&row.to_vec(), n_out))
        .collect();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let data = Array2::from_shape_vec((buffer.n_channels(), n_out), flat)
        .map_err(|e| Error::shape(e.to_string()))?;

    tracing::debug!(from = current, to = target, n_in = n, n_out, "[resample] done");
    buffer.with_samples(data, target)
}
