//! Bad windows by power

use super::{CleaningSettings, enabled};
use crate::Result;
use crate::buffer::{Annotation, TimeSeriesBuffer};
use crate::stats;
use ndarray::Array2;
use std::time::Instant;

/// Out-of-bound channel percentage used when `max_outbound_pct` is unset
pub const DEFAULT_OUTBOUND_PCT: f64 = 25.0;

/// Windows in which more than `pct` percent of channels leave `[min_sd, max_sd]`
///
/// `z` is `channels × windows`. A NaN z-score counts as out of bounds.
#[must_use]
pub fn flag_windows(z: &Array2<f64>, min_sd: f64, max_sd: f64, pct: f64) -> Vec<usize> {
    let n_ch = z.nrows();
    if n_ch == 0 {
        return Vec::new();
    }
    z.columns()
        .into_iter()
        .enumerate()
        .filter(|(_, col)| {
            let out = col
                .iter()
                .filter(|v| !(**v >= min_sd && **v <= max_sd))
                .count();
            out as f64 * 100.0 / n_ch as f64 > pct
        })
        .map(|(w, _)| w)
        .collect()
}

/// Annotate `bad_power` windows of `window_sec` seconds (stride one sample)
///
/// Mean power is computed per channel and window, then z-scored across
/// windows per channel. Samples already under a `bad*` annotation are left
/// out; each annotation spans its window's first to last original sample.
pub fn mark_bad_windows_by_power(
    mut buffer: TimeSeriesBuffer,
    settings: &CleaningSettings,
) -> Result<TimeSeriesBuffer> {
    let t0 = Instant::now();
    let Some(window_sec) = enabled(settings.window_sec) else {
        tracing::info!(clean_window_sec = ?settings.window_sec, "[bad_windows] disabled");
        return Ok(buffer);
    };
    let min_sd = settings.power_min_sd.filter(|v| v.is_finite()).unwrap_or(f64::NEG_INFINITY);
    let max_sd = settings.power_max_sd.filter(|v| v.is_finite()).unwrap_or(f64::INFINITY);
    if min_sd.is_infinite() && max_sd.is_infinite() {
        tracing::info!("[bad_windows] no power bounds -> skip");
        return Ok(buffer);
    }
    let pct = settings
        .max_outbound_pct
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_OUTBOUND_PCT);

    let picks = buffer.eeg_picks(true);
    if picks.is_empty() {
        tracing::info!("[bad_windows] no EEG picks -> skip");
        return Ok(buffer);
    }
    let sfreq = buffer.sfreq();
    let win = ((window_sec * sfreq).round() as usize).max(1);
    let data = buffer.data_for(&picks, true);
    if data.ncols() < win {
        tracing::info!(win, n = data.ncols(), "[bad_windows] signal shorter than window -> skip");
        return Ok(buffer);
    }
    let kept: Vec<usize> = buffer
        .good_sample_mask()
        .into_iter()
        .enumerate()
        .filter_map(|(i, good)| good.then_some(i))
        .collect();

    let n_windows = data.ncols() - win + 1;
    let mut z = Array2::zeros((picks.len(), n_windows));
    for (row, trace) in data.outer_iter().enumerate() {
        let sq: Vec<f64> = trace.iter().map(|v| v * v).collect();
        let power: Vec<f64> = stats::sliding_sums(&sq, win)
            .into_iter()
            .map(|s| s / win as f64)
            .collect();
        for (w, value) in stats::zscore(&power).into_iter().enumerate() {
            z[[row, w]] = value;
        }
    }

    let flagged = flag_windows(&z, min_sd, max_sd, pct);
    if flagged.is_empty() {
        tracing::info!(elapsed_ms = t0.elapsed().as_millis(), "[bad_windows] no windows flagged");
        return Ok(buffer);
    }
    let count = flagged.len();
    // A window bridging an omitted span covers its first to last kept sample
    buffer.annotate(flagged.into_iter().map(|w| {
        let (first, last) = (kept[w], kept[w + win - 1]);
        Annotation::new(
            first as f64 / sfreq,
            (last + 1 - first) as f64 / sfreq,
            "bad_power",
        )
    }));
    tracing::info!(
        count,
        win_sec = win as f64 / sfreq,
        min_sd,
        max_sd,
        pct,
        elapsed_ms = t0.elapsed().as_millis(),
        "[bad_windows] annotated windows"
    );
    Ok(buffer)
}
