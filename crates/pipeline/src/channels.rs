//! Channel selection for presenting a processed buffer

use crate::params::FilterParams;
use crate::{PipelineError, Result};
use eegflow_signal::{ChannelInfo, TimeSeriesBuffer};
use ndarray::Axis;
use std::collections::HashSet;

/// Electrodes on the full net, selected by an empty list
pub const NET_SIZE: usize = 128;

/// Name of the channel produced by combining a selection
pub const COMBINED_CHANNEL: &str = "combined";

const UV: f64 = 1e6;

fn electrode_number(token: &str) -> Result<usize> {
    let digits = token.strip_prefix('E').unwrap_or(token);
    digits
        .parse()
        .map_err(|_| PipelineError::params(format!("invalid channel token '{token}'")))
}

/// Expand a channel list such as `"69-76,81-83,88"` into `E69..E76,E81..E83,E88`
///
/// Tokens are separated by commas or whitespace; ranges may run in either
/// direction. Duplicates are dropped, first occurrence wins. An empty list
/// selects the whole net.
pub fn parse_channel_list(list: &str) -> Result<Vec<String>> {
    if list.trim().is_empty() {
        return Ok((1..=NET_SIZE).map(|i| format!("E{i}")).collect());
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in list.split([',', ' ', '\t', '\n']).filter(|t| !t.is_empty()) {
        let numbers: Vec<usize> = match token.split_once('-') {
            Some((a, b)) => {
                let (a, b) = (electrode_number(a)?, electrode_number(b)?);
                (a.min(b)..=a.max(b)).collect()
            }
            None => vec![electrode_number(token)?],
        };
        for n in numbers {
            let name = format!("E{n}");
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
    }
    Ok(out)
}

/// Channels picked for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelection {
    /// Row indices into the source buffer
    pub picks: Vec<usize>,
    /// Names of the picked channels
    pub names: Vec<String>,
}

impl ChannelSelection {
    /// Pick the listed channels present in `buffer`, honouring `show_bad` and the µV bounds
    ///
    /// When the µV bounds would remove every channel the unbounded pick is kept.
    pub fn select(buffer: &TimeSeriesBuffer, params: &FilterParams) -> Result<Self> {
        let wanted: HashSet<String> = params.channel_names()?.into_iter().collect();
        let picks: Vec<usize> = buffer
            .channels()
            .iter()
            .enumerate()
            .filter(|(_, c)| wanted.contains(&c.name))
            .filter(|(_, c)| params.show_bad || !buffer.is_bad(&c.name))
            .map(|(i, _)| i)
            .collect();

        let picks = if (params.uv_min.is_none() && params.uv_max.is_none()) || picks.is_empty() {
            picks
        } else {
            let lo = params.uv_min.unwrap_or(f64::NEG_INFINITY);
            let hi = params.uv_max.unwrap_or(f64::INFINITY);
            let kept: Vec<usize> = picks
                .iter()
                .copied()
                .filter(|&row| {
                    let trace = buffer.data().index_axis(Axis(0), row);
                    let finite = trace.iter().filter(|v| v.is_finite()).map(|v| v * UV);
                    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), v| {
                        (a.min(v), b.max(v))
                    });
                    min >= lo && max <= hi
                })
                .collect();
            if kept.is_empty() {
                tracing::debug!(lo, hi, "[channels] µV bounds remove every channel -> keep unbounded pick");
                picks
            } else {
                kept
            }
        };

        let names = picks
            .iter()
            .map(|&i| buffer.channels()[i].name.clone())
            .collect();
        Ok(Self { picks, names })
    }

    /// Picked buffer, or a single `combined` mean channel when `combine_channels` is set
    pub fn prepare(buffer: &TimeSeriesBuffer, params: &FilterParams) -> Result<TimeSeriesBuffer> {
        let selection = Self::select(buffer, params)?;
        if !params.combine_channels {
            let names: Vec<&str> = selection.names.iter().map(String::as_str).collect();
            return Ok(buffer.clone().pick(&names)?);
        }
        if selection.picks.is_empty() {
            return Ok(buffer.clone());
        }
        let mean = buffer
            .data()
            .select(Axis(0), &selection.picks)
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::params("no channels to combine"))?;
        let n = mean.len();
        let data = mean
            .into_shape_with_order((1, n))
            .map_err(|e| PipelineError::params(e.to_string()))?;
        let mut combined = TimeSeriesBuffer::new(
            data,
            buffer.sfreq(),
            vec![ChannelInfo::eeg(COMBINED_CHANNEL)],
        )?;
        combined.annotate(buffer.annotations().iter().cloned());
        combined.set_passband(buffer.highpass(), buffer.lowpass());
        Ok(combined)
    }
}
