//! Flatline channel detection

use super::{CleaningSettings, enabled};
use crate::Result;
use crate::buffer::TimeSeriesBuffer;
use std::time::Instant;

/// Longest run of exactly repeated values in `x`
#[allow(clippy::float_cmp)]
fn longest_constant_run(x: &[f64]) -> usize {
    let mut best = usize::from(!x.is_empty());
    let mut run = best;
    for pair in x.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            best = best.max(run);
        } else {
            run = 1;
        }
    }
    best
}

/// Mark channels that stay constant for `flatline_sec` seconds or longer
///
/// A channel is flat when some window of `round(flatline_sec · sfreq)`
/// samples has `max - min == 0`.
pub fn mark_flatline_channels(
    mut buffer: TimeSeriesBuffer,
    settings: &CleaningSettings,
) -> Result<TimeSeriesBuffer> {
    let t0 = Instant::now();
    let Some(flat_sec) = enabled(settings.flatline_sec) else {
        tracing::info!(clean_flatline_sec = ?settings.flatline_sec, "[flatline] disabled");
        return Ok(buffer);
    };
    let n_samples = (flat_sec * buffer.sfreq()).round() as usize;
    if n_samples <= 1 {
        tracing::info!(n = n_samples, "[flatline] window too small -> skip");
        return Ok(buffer);
    }
    let picks = buffer.eeg_picks(true);
    if picks.is_empty() {
        tracing::info!("[flatline] no EEG picks -> skip");
        return Ok(buffer);
    }

    let data = buffer.data_for(&picks, true);
    let bad: Vec<String> = data
        .outer_iter()
        .zip(&picks)
        .filter(|(row, _)| row.len() >= n_samples)
        .filter(|(row, _)| longest_constant_run(&row.to_vec()) >= n_samples)
        .map(|(_, &ch)| buffer.channels()[ch].name.clone())
        .collect();

    if bad.is_empty() {
        tracing::info!(elapsed_ms = t0.elapsed().as_millis(), "[flatline] no channels flagged");
    } else {
        tracing::info!(count = bad.len(), flat_sec, channels = ?bad, "[flatline] marking channels bad");
        buffer.mark_bad(bad)?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{buffer_from, noise};
    use super::*;

    fn with_plateau(seed: u64, n: usize, start: usize, len: usize) -> Vec<f64> {
        let mut x = noise(seed, n);
        x[start..start + len].iter_mut().for_each(|v| *v = 0.25);
        x
    }

    #[test]
    fn test_plateau_of_501_samples_is_flagged_499_is_not() {
        let rows = vec![
            with_plateau(1, 3000, 1000, 501),
            with_plateau(2, 3000, 1000, 499),
            noise(3, 3000),
        ];
        let settings = CleaningSettings {
            flatline_sec: Some(5.0),
            ..CleaningSettings::default()
        };
        let out = mark_flatline_channels(buffer_from(rows, 100.0), &settings).unwrap();
        assert!(out.is_bad("E1"));
        assert!(!out.is_bad("E2"));
        assert!(!out.is_bad("E3"));
    }

    #[test]
    fn test_exactly_window_length_is_flagged() {
        let rows = vec![with_plateau(4, 2000, 0, 500), noise(5, 2000)];
        let settings = CleaningSettings {
            flatline_sec: Some(5.0),
            ..CleaningSettings::default()
        };
        let out = mark_flatline_channels(buffer_from(rows, 100.0), &settings).unwrap();
        assert!(out.is_bad("E1"));
    }

    #[test]
    fn test_disabled_and_tiny_windows_skip() {
        let rows = vec![vec![0.0; 100]];
        let off = CleaningSettings {
            flatline_sec: Some(0.0),
            ..CleaningSettings::default()
        };
        assert!(mark_flatline_channels(buffer_from(rows.clone(), 100.0), &off).unwrap().bads().is_empty());
        let tiny = CleaningSettings {
            flatline_sec: Some(0.01),
            ..CleaningSettings::default()
        };
        assert!(mark_flatline_channels(buffer_from(rows, 100.0), &tiny).unwrap().bads().is_empty());
    }

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_constant_run(&[]), 0);
        assert_eq!(longest_constant_run(&[1.0]), 1);
        assert_eq!(longest_constant_run(&[1.0, 2.0, 2.0, 2.0, 3.0, 3.0]), 3);
    }
}
