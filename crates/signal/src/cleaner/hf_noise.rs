//! High-frequency noise channel detection

use super::{CleaningSettings, enabled};
use crate::buffer::TimeSeriesBuffer;
use crate::{Error, Result, spectral, stats};
use ndarray::Array2;
use std::time::Instant;

/// Default band (Hz) whose power flags noisy channels
pub const HF_BAND: (f64, f64) = (30.0, 100.0);

/// Welch band power per row
fn band_powers(data: &Array2<f64>, sfreq: f64, fmin: f64, fmax: f64) -> Result<Vec<f64>> {
    data.outer_iter()
        .map(|row| spectral::welch(&row.to_vec(), sfreq)?.band_power(fmin, fmax))
        .collect()
}

fn rms_per_row(data: &Array2<f64>) -> Vec<f64> {
    data.outer_iter()
        .map(|row| {
            let sq: Vec<f64> = row.iter().map(|v| v * v).collect();
            stats::nanmean(&sq).sqrt()
        })
        .collect()
}

/// Mark channels whose high-frequency band power is a z-score outlier
///
/// The band is [`HF_BAND`] clipped to the buffer's recorded passband; the
/// detector is skipped when less than 1 Hz of it remains. If the spectral
/// estimate cannot be computed the per-channel RMS is used instead.
pub fn mark_hf_noise_channels(
    mut buffer: TimeSeriesBuffer,
    settings: &CleaningSettings,
) -> Result<TimeSeriesBuffer> {
    let t0 = Instant::now();
    let Some(sd_max) = enabled(settings.hf_noise_sd_max) else {
        tracing::info!(clean_hf_noise_sd_max = ?settings.hf_noise_sd_max, "[hf-noise] disabled");
        return Ok(buffer);
    };
    let picks = buffer.eeg_picks(true);
    if picks.is_empty() {
        tracing::info!("[hf-noise] no EEG picks -> skip");
        return Ok(buffer);
    }
    let fmin = HF_BAND.0.max(buffer.highpass());
    let fmax = HF_BAND.1.min(buffer.lowpass());
    if !fmax.is_finite() || fmax <= fmin + 1.0 {
        tracing::info!(fmin, fmax, "[hf-noise] insufficient passband -> skip");
        return Ok(buffer);
    }

    let data = buffer.data_for(&picks, true);
    let power = match band_powers(&data, buffer.sfreq(), fmin, fmax) {
        Ok(power) => power,
        Err(err @ Error::Numeric { .. }) => {
            tracing::info!(error = %err, "[hf-noise] PSD failed -> fallback to RMS");
            rms_per_row(&data)
        }
        Err(err) => return Err(err),
    };

    let z = stats::zscore(&power);
    let bad: Vec<String> = z
        .iter()
        .zip(&picks)
        .filter(|(z, _)| **z > sd_max)
        .map(|(_, &ch)| buffer.channels()[ch].name.clone())
        .collect();
    if bad.is_empty() {
        tracing::info!(elapsed_ms = t0.elapsed().as_millis(), "[hf-noise] no channels flagged");
    } else {
        tracing::info!(count = bad.len(), sd_max, channels = ?bad, "[hf-noise] marking channels bad");
        buffer.mark_bad(bad)?;
    }
    Ok(buffer)
}
