//! Artifact subspace reconstruction
//!
//! Calibration estimates a mixing matrix (matrix square root of the channel
//! covariance) and, per principal component, a robust RMS threshold
//! `median + cutoff · 1.4826 · MAD` over half-overlapping windows. Processing
//! walks the data in consecutive windows; components whose variance exceeds
//! their threshold are dropped and the window is reconstructed from the
//! remaining subspace.

use super::{CleaningSettings, enabled};
use crate::buffer::{Annotation, TimeSeriesBuffer};
use crate::{Error, Result, stats};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, Axis, s};
use std::time::Instant;

/// Window length used when `window_sec` is unset
pub const DEFAULT_WINDOW_SEC: f64 = 0.5;
/// Largest fraction of components a single window may lose
const MAX_DROPPED_FRACTION: f64 = 0.66;
/// Volts to microvolts; keeps covariances well conditioned
const UV: f64 = 1e6;
const MAD_SCALE: f64 = 1.4826;
const PINV_EPS: f64 = 1e-10;

/// Calibrated reconstruction model
#[derive(Debug, Clone)]
pub struct AsrModel {
    mixing: DMatrix<f64>,
    threshold: DMatrix<f64>,
    window: usize,
}

fn to_matrix(data: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(data.nrows(), data.ncols(), |i, j| data[[i, j]])
}

fn covariance(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.ncols().max(1) as f64;
    (x * x.transpose()) / n
}

/// Eigen-decomposition with eigenvalues in ascending order
fn sorted_eigen(m: DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let eig = SymmetricEigen::new(m);
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let values = order.iter().map(|&i| eig.eigenvalues[i]).collect();
    let vectors = DMatrix::from_fn(eig.eigenvectors.nrows(), order.len(), |r, c| {
        eig.eigenvectors[(r, order[c])]
    });
    (values, vectors)
}

impl AsrModel {
    /// Calibrate on `channels × samples` data (any unit)
    pub fn calibrate(data: &Array2<f64>, sfreq: f64, cutoff: f64, window_sec: f64) -> Result<Self> {
        let n_ch = data.nrows();
        let window = ((window_sec * sfreq).round() as usize).max(2);
        if n_ch < 2 {
            return Err(Error::numeric("asr", "needs at least two channels"));
        }
        if data.ncols() < window * 2 {
            return Err(Error::numeric(
                "asr",
                format!("{} samples cannot fill two {window}-sample windows", data.ncols()),
            ));
        }

        let x = to_matrix(data);
        let (eigvals, eigvecs) = sorted_eigen(covariance(&x));
        let sqrt_vals = DMatrix::from_diagonal(&nalgebra::DVector::from_iterator(
            n_ch,
            eigvals.iter().map(|v| v.max(0.0).sqrt()),
        ));
        let mixing = &eigvecs * sqrt_vals * eigvecs.transpose();

        // Component RMS over half-overlapping windows
        let (_, v) = sorted_eigen(mixing.clone());
        let components = v.transpose() * &x;
        let step = (window / 2).max(1);
        let mut limits = Vec::with_capacity(n_ch);
        for comp in components.row_iter() {
            let mut rms = Vec::new();
            let mut start = 0;
            while start + window <= comp.len() {
                let seg = comp.columns_range(start..start + window);
                rms.push((seg.iter().map(|v| v * v).sum::<f64>() / window as f64).sqrt());
                start += step;
            }
            let median = stats::nanmedian(&rms);
            let deviations: Vec<f64> = rms.iter().map(|r| (r - median).abs()).collect();
            let spread = MAD_SCALE * stats::nanmedian(&deviations);
            limits.push(median + cutoff * spread);
        }
        let threshold = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(limits)) * v.transpose();

        Ok(Self {
            mixing,
            threshold,
            window,
        })
    }

    /// Reconstruct every window from its sub-threshold subspace
    #[must_use]
    pub fn process(&self, data: &Array2<f64>) -> Array2<f64> {
        let n_ch = data.nrows();
        let n = data.ncols();
        let max_dropped = ((n_ch as f64) * MAX_DROPPED_FRACTION).round() as usize;
        let mut out = data.clone();
        let mut start = 0;
        let mut reconstructed = 0usize;
        while start < n {
            let stop = (start + self.window).min(n);
            let block = data.slice(s![.., start..stop]).to_owned();
            let x = to_matrix(&block);
            let (eigvals, v) = sorted_eigen(covariance(&x));
            let projected = &self.threshold * &v;

            let keep: Vec<bool> = (0..n_ch)
                .map(|i| {
                    let limit: f64 = projected.column(i).iter().map(|t| t * t).sum();
                    eigvals[i] < limit || i < n_ch.saturating_sub(max_dropped)
                })
                .collect();
            if keep.iter().all(|k| *k) {
                start = stop;
                continue;
            }

            let mut vm = v.transpose() * &self.mixing;
            for (i, k) in keep.iter().enumerate() {
                if !k {
                    vm.row_mut(i).fill(0.0);
                }
            }
            if let Ok(pinv) = vm.pseudo_inverse(PINV_EPS) {
                let r = &self.mixing * pinv * v.transpose();
                let cleaned = r * x;
                out.slice_mut(s![.., start..stop])
                    .assign(&Array2::from_shape_fn((n_ch, stop - start), |(i, j)| cleaned[(i, j)]));
                reconstructed += 1;
            }
            start = stop;
        }
        tracing::debug!(windows = reconstructed, "[ASR] windows reconstructed");
        out
    }
}

/// Annotate windows whose median residual RMS is a z-score outlier
fn residual_windows(residual: &Array2<f64>, window: usize, cutoff: f64) -> Vec<usize> {
    if residual.ncols() < window {
        return Vec::new();
    }
    let per_channel: Vec<Vec<f64>> = residual
        .outer_iter()
        .map(|row| {
            let sq: Vec<f64> = row.iter().map(|v| v * v).collect();
            stats::sliding_sums(&sq, window)
                .into_iter()
                .map(|s| (s / window as f64).sqrt())
                .collect()
        })
        .collect();
    let n_windows = residual.ncols() - window + 1;
    let median: Vec<f64> = (0..n_windows)
        .map(|w| {
            let col: Vec<f64> = per_channel.iter().map(|c| c[w]).collect();
            stats::nanmedian(&col)
        })
        .collect();
    stats::zscore(&median)
        .into_iter()
        .enumerate()
        .filter(|(_, z)| *z > cutoff)
        .map(|(w, _)| w)
        .collect()
}

/// Reconstruct the EEG channels, or annotate `bad_asr` windows in remove-only mode
///
/// Numeric failures (too little data, too few channels) skip the step with
/// a warning.
pub fn apply_asr(mut buffer: TimeSeriesBuffer, settings: &CleaningSettings) -> Result<TimeSeriesBuffer> {
    let t0 = Instant::now();
    let Some(cutoff) = enabled(settings.asr_max_std) else {
        tracing::info!(clean_asr_max_std = ?settings.asr_max_std, "[ASR] disabled");
        return Ok(buffer);
    };
    let picks = buffer.eeg_picks(true);
    if picks.is_empty() {
        tracing::info!("[ASR] no EEG picks -> skip");
        return Ok(buffer);
    }
    let sfreq = buffer.sfreq();
    let window_sec = enabled(settings.window_sec).unwrap_or(DEFAULT_WINDOW_SEC);
    let data_uv = buffer.data_for(&picks, false) * UV;

    let model = match AsrModel::calibrate(&data_uv, sfreq, cutoff, window_sec) {
        Ok(model) => model,
        Err(err @ Error::Numeric { .. }) => {
            tracing::warn!(error = %err, "[ASR] failed; skipping");
            return Ok(buffer);
        }
        Err(err) => return Err(err),
    };
    let cleaned_uv = model.process(&data_uv);

    if settings.asr_remove_only {
        let win = ((window_sec * sfreq).round() as usize).max(1);
        let residual = &data_uv - &cleaned_uv;
        let flagged = residual_windows(&residual, win, cutoff);
        if flagged.is_empty() {
            tracing::info!(elapsed_ms = t0.elapsed().as_millis(), "[ASR] remove_only: no windows flagged");
            return Ok(buffer);
        }
        let duration = win as f64 / sfreq;
        let count = flagged.len();
        buffer.annotate(
            flagged
                .into_iter()
                .map(|w| Annotation::new(w as f64 / sfreq, duration, "bad_asr")),
        );
        tracing::info!(
            count,
            win_sec = duration,
            cutoff,
            elapsed_ms = t0.elapsed().as_millis(),
            "[ASR] remove_only: annotated windows"
        );
        return Ok(buffer);
    }

    let data = buffer.data_mut();
    for (row, &ch) in picks.iter().enumerate() {
        data.row_mut(ch).assign(&(&cleaned_uv.index_axis(Axis(0), row) / UV));
    }
    tracing::info!(
        channels = picks.len(),
        win_sec = window_sec,
        cutoff,
        elapsed_ms = t0.elapsed().as_millis(),
        "[ASR] reconstructed data"
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{buffer_from, noise};
    use super::*;

    fn rows_with_burst() -> Vec<Vec<f64>> {
        let n = 5000;
        (0..6)
            .map(|c| {
                let mut x: Vec<f64> = noise(c, n).iter().map(|v| v * 1e-5).collect();
                if c < 2 {
                    for v in &mut x[3000..3100] {
                        *v += 4e-3;
                    }
                }
                x
            })
            .collect()
    }

    fn settings(remove_only: bool) -> CleaningSettings {
        CleaningSettings {
            asr_max_std: Some(20.0),
            asr_remove_only: remove_only,
            window_sec: Some(0.5),
            ..CleaningSettings::default()
        }
    }

    #[test]
    fn test_reconstruction_shrinks_burst() {
        let buf = buffer_from(rows_with_burst(), 250.0);
        let before = buf.data()[[0, 3050]].abs();
        let quiet = buf.data()[[3, 1000]];
        let out = apply_asr(buf, &settings(false)).unwrap();
        assert!(out.data()[[0, 3050]].abs() < before / 2.0);
        // Windows without artifacts are left as they were
        assert!((out.data()[[3, 1000]] - quiet).abs() < 1e-12);
        assert!(out.annotations().is_empty());
    }

    #[test]
    fn test_remove_only_never_touches_data() {
        let buf = buffer_from(rows_with_burst(), 250.0);
        let out = apply_asr(buf.clone(), &settings(true)).unwrap();
        assert_eq!(out.data(), buf.data());
        assert!(out.annotations().iter().all(|a| a.description == "bad_asr"));
    }

    #[test]
    fn test_residual_windows_flag_spike() {
        let mut residual = Array2::zeros((2, 1000));
        residual.slice_mut(s![.., 500..506]).fill(1.0);
        let flagged = residual_windows(&residual, 10, 3.0);
        assert!(!flagged.is_empty());
        assert!(flagged.iter().all(|w| (491..=505).contains(w)));
    }

    #[test]
    fn test_too_short_is_skipped() {
        let buf = buffer_from(vec![noise(1, 50), noise(2, 50)], 250.0);
        let out = apply_asr(buf.clone(), &settings(false)).unwrap();
        assert_eq!(out, buf);
    }
}
