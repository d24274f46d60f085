//! Low-correlation channel detection

use super::CleaningSettings;
use crate::buffer::TimeSeriesBuffer;
use crate::{Result, stats};
use std::time::Instant;

/// Minimum number of finite sample pairs for a meaningful correlation
const MIN_PAIRS: usize = 10;

/// Mark channels poorly correlated with the cross-channel median trace
///
/// Enabled when `0 < corr_min <= 1`. Needs at least three good EEG channels.
/// Channels with too few finite samples count as perfectly correlated.
pub fn mark_lowcorr_channels(
    mut buffer: TimeSeriesBuffer,
    settings: &CleaningSettings,
) -> Result<TimeSeriesBuffer> {
    let t0 = Instant::now();
    let Some(corr_min) = settings.corr_min.filter(|c| *c > 0.0 && *c <= 1.0) else {
        tracing::info!(clean_corr_min = ?settings.corr_min, "[lowcorr] disabled");
        return Ok(buffer);
    };
    let picks = buffer.eeg_picks(true);
    if picks.len() < 3 {
        tracing::info!(picks = picks.len(), "[lowcorr] <3 EEG channels -> skip");
        return Ok(buffer);
    }

    let data = buffer.data_for(&picks, true);
    let reference: Vec<f64> = data
        .columns()
        .into_iter()
        .map(|col| stats::nanmedian(&col.to_vec()))
        .collect();

    let mut bad = Vec::new();
    for (row, &ch) in data.outer_iter().zip(&picks) {
        let corr = stats::pearson(&row.to_vec(), &reference, MIN_PAIRS).map_or(1.0, f64::abs);
        if corr < corr_min {
            bad.push(buffer.channels()[ch].name.clone());
        }
    }

    if bad.is_empty() {
        tracing::info!(elapsed_ms = t0.elapsed().as_millis(), "[lowcorr] no channels flagged");
    } else {
        tracing::info!(count = bad.len(), corr_min, channels = ?bad, "[lowcorr] marking channels bad");
        buffer.mark_bad(bad)?;
    }
    Ok(buffer)
}
