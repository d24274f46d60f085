//! Event-locked epochs and their averages
//!
//! An [`EpochCollection`] holds fixed-length windows cut around events of a
//! [`TimeSeriesBuffer`]; an [`AveragedResponse`] is their per-sample mean.

use crate::buffer::{ChannelInfo, TimeSeriesBuffer};
use crate::interpolate::Interpolation;
use crate::{Error, Result};
use ndarray::{Array1, Array2, Array3, Axis, s};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Comment used for an average over every condition
pub const ALL_CONDITIONS: &str = "all";

/// An event: sample index in the source buffer plus its condition id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochEvent {
    /// Sample index of the event onset
    pub sample: usize,
    /// Condition id, resolved through the collection's `event_id` table
    pub id: i32,
}

/// Baseline interval in seconds; `None` bounds extend to the epoch edge
pub type Baseline = (Option<f64>, Option<f64>);

/// Fixed-length windows cut around events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochCollection {
    /// `epochs × channels × times`
    data: Array3<f64>,
    sfreq: f64,
    tmin: f64,
    channels: Vec<ChannelInfo>,
    bads: BTreeSet<String>,
    events: Vec<EpochEvent>,
    event_id: BTreeMap<String, i32>,
    /// Index into the requested events of every kept epoch
    selection: Vec<usize>,
    baseline: Option<Baseline>,
}

impl EpochCollection {
    /// Cut `[tmin, tmax]` windows around `events`
    ///
    /// An event is kept iff `sample + floor(tmin·sfreq) >= 0` and
    /// `sample + ceil(tmax·sfreq) < n_samples`, and its window does not
    /// overlap a `bad*` annotation. Events whose id is not in `event_id`
    /// are skipped. [`Self::selection`] reports which events survived.
    pub fn from_events(
        buffer: &TimeSeriesBuffer,
        events: &[EpochEvent],
        event_id: BTreeMap<String, i32>,
        tmin: f64,
        tmax: f64,
    ) -> Result<Self> {
        if !(tmin.is_finite() && tmax.is_finite()) || tmax < tmin {
            return Err(Error::parameter("tmin", format!("invalid window [{tmin}, {tmax}]")));
        }
        let sfreq = buffer.sfreq();
        let n_samples = buffer.n_samples() as i64;
        let lo_floor = (tmin * sfreq).floor() as i64;
        let hi_ceil = (tmax * sfreq).ceil() as i64;
        let lo = (tmin * sfreq).round() as i64;
        let hi = (tmax * sfreq).round() as i64;
        let n_times = (hi - lo + 1) as usize;

        let known: BTreeSet<i32> = event_id.values().copied().collect();
        let mask = buffer.good_sample_mask();
        let mut kept_events = Vec::new();
        let mut selection = Vec::new();
        for (idx, ev) in events.iter().enumerate() {
            if !known.contains(&ev.id) {
                continue;
            }
            let sample = ev.sample as i64;
            if sample + lo_floor < 0 || sample + hi_ceil >= n_samples {
                continue;
            }
            let start = (sample + lo) as usize;
            let stop = (sample + hi) as usize;
            if mask[start..=stop].iter().any(|good| !good) {
                continue;
            }
            kept_events.push(*ev);
            selection.push(idx);
        }

        let n_channels = buffer.n_channels();
        let mut data = Array3::zeros((kept_events.len(), n_channels, n_times));
        for (e, ev) in kept_events.iter().enumerate() {
            let start = (ev.sample as i64 + lo) as usize;
            data.index_axis_mut(Axis(0), e)
                .assign(&buffer.data().slice(s![.., start..start + n_times]));
        }

        tracing::debug!(
            requested = events.len(),
            kept = kept_events.len(),
            tmin,
            tmax,
            "[epochs] windows cut"
        );
        Ok(Self {
            data,
            sfreq,
            tmin: lo as f64 / sfreq,
            channels: buffer.channels().to_vec(),
            bads: buffer.bads().clone(),
            events: kept_events,
            event_id,
            selection,
            baseline: None,
        })
    }

    /// Number of epochs
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Whether no epoch survived
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples per epoch
    #[must_use]
    pub fn n_times(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Sampling rate in Hz
    #[must_use]
    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    /// Time of the first sample relative to the event
    #[must_use]
    pub fn tmin(&self) -> f64 {
        self.tmin
    }

    /// Time of the last sample relative to the event
    #[must_use]
    pub fn tmax(&self) -> f64 {
        self.tmin + (self.n_times().saturating_sub(1)) as f64 / self.sfreq
    }

    /// Sample times relative to the event
    #[must_use]
    pub fn times(&self) -> Array1<f64> {
        Array1::from_iter((0..self.n_times()).map(|i| self.tmin + i as f64 / self.sfreq))
    }

    /// Epoch data, `epochs × channels × times`
    #[must_use]
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Channel metadata
    #[must_use]
    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    /// Channels marked bad
    #[must_use]
    pub fn bads(&self) -> &BTreeSet<String> {
        &self.bads
    }

    /// Kept events in epoch order
    #[must_use]
    pub fn events(&self) -> &[EpochEvent] {
        &self.events
    }

    /// Condition name → id table
    #[must_use]
    pub fn event_id(&self) -> &BTreeMap<String, i32> {
        &self.event_id
    }

    /// Positions of kept epochs in the event list they were cut from
    #[must_use]
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    /// Baseline applied so far, if any
    #[must_use]
    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// Condition name of every epoch
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        let by_id: BTreeMap<i32, &str> = self
            .event_id
            .iter()
            .map(|(name, id)| (*id, name.as_str()))
            .collect();
        self.events
            .iter()
            .map(|e| by_id.get(&e.id).map_or_else(|| e.id.to_string(), |n| (*n).to_string()))
            .collect()
    }

    /// Interpolate every bad channel, optionally clearing the bad set
    pub fn interpolate_bads(mut self, reset_bads: bool) -> Result<Self> {
        if let Some(interp) = Interpolation::for_layout(&self.channels, &self.bads)? {
            for epoch in self.data.outer_iter_mut() {
                interp.apply(epoch);
            }
            tracing::info!(bads = ?self.bads, spline = interp.is_spline(), "[epochs] interpolated bad channels");
        }
        if reset_bads {
            self.bads.clear();
        }
        Ok(self)
    }

    /// Subtract the per-epoch, per-channel mean over the baseline interval
    ///
    /// An interval that contains no sample leaves the data untouched.
    #[must_use]
    pub fn apply_baseline(mut self, baseline: Baseline) -> Self {
        let times = self.times();
        let (b0, b1) = baseline;
        let lo = b0.unwrap_or(f64::NEG_INFINITY);
        let hi = b1.unwrap_or(f64::INFINITY);
        let half_step = 0.5 / self.sfreq;
        let idx: Vec<usize> = times
            .iter()
            .enumerate()
            .filter(|(_, t)| **t >= lo - half_step && **t <= hi + half_step)
            .map(|(i, _)| i)
            .collect();
        if idx.is_empty() {
            tracing::info!(?baseline, "[epochs] baseline interval holds no sample -> skip");
            return self;
        }
        for mut epoch in self.data.outer_iter_mut() {
            for mut channel in epoch.outer_iter_mut() {
                let mean = idx.iter().map(|&i| channel[i]).sum::<f64>() / idx.len() as f64;
                channel.mapv_inplace(|v| v - mean);
            }
        }
        self.baseline = Some(baseline);
        self
    }

    /// Keep only the epochs of `condition`; `None` if the condition is unknown
    #[must_use]
    pub fn select(mut self, condition: &str) -> Option<Self> {
        let id = *self.event_id.get(condition)?;
        let keep: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.id == id)
            .map(|(i, _)| i)
            .collect();
        self.data = self.data.select(Axis(0), &keep);
        self.events = keep.iter().map(|&i| self.events[i]).collect();
        self.selection = keep.iter().map(|&i| self.selection[i]).collect();
        self.event_id.retain(|name, _| name == condition);
        Some(self)
    }

    /// Mean over epochs
    pub fn average(&self, comment: impl Into<String>) -> Result<AveragedResponse> {
        let data = self.data.mean_axis(Axis(0)).ok_or(Error::Empty {
            operation: "average",
        })?;
        Ok(AveragedResponse {
            data,
            sfreq: self.sfreq,
            tmin: self.tmin,
            channels: self.channels.clone(),
            bads: self.bads.clone(),
            nave: self.len(),
            comment: comment.into(),
        })
    }

    /// Stack collections that share channels and time axis
    ///
    /// Condition tables are unioned; a name mapped to two different ids is
    /// rejected. Bad sets are unioned.
    pub fn concatenate(collections: Vec<Self>) -> Result<Self> {
        let mut iter = collections.into_iter();
        let mut out = iter.next().ok_or(Error::Empty {
            operation: "concatenate epochs",
        })?;
        for next in iter {
            if next.channels.iter().map(|c| &c.name).ne(out.channels.iter().map(|c| &c.name)) {
                return Err(Error::incompatible("epoch channel sets differ"));
            }
            if next.n_times() != out.n_times()
                || (next.sfreq - out.sfreq).abs() > 1e-6
                || (next.tmin - out.tmin).abs() > 1e-9
            {
                return Err(Error::incompatible("epoch time axes differ"));
            }
            for (name, id) in &next.event_id {
                match out.event_id.get(name) {
                    Some(existing) if existing != id => {
                        return Err(Error::incompatible(format!(
                            "condition '{name}' has ids {existing} and {id}"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        out.event_id.insert(name.clone(), *id);
                    }
                }
            }
            out.data = ndarray::concatenate(Axis(0), &[out.data.view(), next.data.view()])
                .map_err(|e| Error::shape(e.to_string()))?;
            let offset = out.selection.iter().max().map_or(0, |m| m + 1);
            out.selection
                .extend(next.selection.iter().map(|s| s + offset));
            out.events.extend(next.events);
            out.bads.extend(next.bads);
            if out.baseline != next.baseline {
                out.baseline = None;
            }
        }
        Ok(out)
    }
}

/// Per-sample mean of a set of epochs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedResponse {
    /// `channels × times`
    data: Array2<f64>,
    sfreq: f64,
    tmin: f64,
    channels: Vec<ChannelInfo>,
    bads: BTreeSet<String>,
    nave: usize,
    comment: String,
}

impl AveragedResponse {
    /// Averaged data, `channels × times`
    #[must_use]
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Sampling rate in Hz
    #[must_use]
    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    /// Time of the first sample relative to the event
    #[must_use]
    pub fn tmin(&self) -> f64 {
        self.tmin
    }

    /// Sample times relative to the event
    #[must_use]
    pub fn times(&self) -> Array1<f64> {
        Array1::from_iter((0..self.data.ncols()).map(|i| self.tmin + i as f64 / self.sfreq))
    }

    /// Channel metadata
    #[must_use]
    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    /// Channels marked bad
    #[must_use]
    pub fn bads(&self) -> &BTreeSet<String> {
        &self.bads
    }

    /// Number of trials averaged
    #[must_use]
    pub fn nave(&self) -> usize {
        self.nave
    }

    /// Condition name or [`ALL_CONDITIONS`]
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Interpolate bad channels and clear the bad set
    pub fn interpolate_bads(mut self) -> Result<Self> {
        if let Some(interp) = Interpolation::for_layout(&self.channels, &self.bads)? {
            interp.apply(self.data.view_mut());
        }
        self.bads.clear();
        Ok(self)
    }

    /// Unweighted mean of responses with identical layout
    ///
    /// Bad channels are interpolated first; `nave` is the sum of the inputs.
    pub fn grand_average(responses: Vec<Self>) -> Result<Self> {
        let responses: Vec<Self> = responses
            .into_iter()
            .map(Self::interpolate_bads)
            .collect::<Result<_>>()?;
        let first = responses.first().ok_or(Error::Empty {
            operation: "grand average",
        })?;
        for r in &responses[1..] {
            if r.channels.iter().map(|c| &c.name).ne(first.channels.iter().map(|c| &c.name)) {
                return Err(Error::incompatible("evoked channel sets differ"));
            }
            if r.data.dim() != first.data.dim()
                || (r.sfreq - first.sfreq).abs() > 1e-6
                || (r.tmin - first.tmin).abs() > 1e-9
            {
                return Err(Error::incompatible("evoked time axes differ"));
            }
        }
        let mut sum = Array2::<f64>::zeros(first.data.dim());
        for r in &responses {
            sum += &r.data;
        }
        let n = responses.len() as f64;
        let comments: BTreeSet<&str> = responses.iter().map(|r| r.comment.as_str()).collect();
        let comment = if comments.len() == 1 {
            first.comment.clone()
        } else {
            "grand average".to_string()
        };
        Ok(Self {
            data: sum / n,
            sfreq: first.sfreq,
            tmin: first.tmin,
            channels: first.channels.clone(),
            bads: BTreeSet::new(),
            nave: responses.iter().map(|r| r.nave).sum(),
            comment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Annotation;

    fn buffer() -> TimeSeriesBuffer {
        let data = Array2::from_shape_fn((2, 100), |(c, t)| (c * 100 + t) as f64);
        TimeSeriesBuffer::new(data, 10.0, vec![ChannelInfo::eeg("E1"), ChannelInfo::eeg("E2")])
            .unwrap()
    }

    fn ids() -> BTreeMap<String, i32> {
        [("open".to_string(), 1), ("close".to_string(), 2)].into()
    }

    #[test]
    fn test_window_bounds_rule() {
        let buf = buffer();
        let events = [
            EpochEvent { sample: 1, id: 1 },  // needs 2 samples before
            EpochEvent { sample: 2, id: 1 },  // exactly fits at the start
            EpochEvent { sample: 50, id: 2 },
            EpochEvent { sample: 96, id: 2 }, // last sample would be 99 -> fits
            EpochEvent { sample: 97, id: 2 }, // would need sample 100
        ];
        let ep = EpochCollection::from_events(&buf, &events, ids(), -0.2, 0.3).unwrap();
        assert_eq!(ep.selection(), &[1, 2, 3]);
        assert_eq!(ep.n_times(), 6);
        assert!((ep.tmin() + 0.2).abs() < 1e-12);
        assert_eq!(ep.data()[[0, 0, 0]], 0.0);
        assert_eq!(ep.labels(), vec!["open", "close", "close"]);
    }

    #[test]
    fn test_bad_annotation_rejects_overlapping_windows() {
        let mut buf = buffer();
        buf.annotate([Annotation::new(5.0, 0.5, "bad_power")]);
        let events = [
            EpochEvent { sample: 20, id: 1 },
            EpochEvent { sample: 52, id: 1 },
        ];
        let ep = EpochCollection::from_events(&buf, &events, ids(), 0.0, 0.2).unwrap();
        assert_eq!(ep.selection(), &[0]);
    }

    #[test]
    fn test_unknown_event_ids_are_skipped() {
        let events = [EpochEvent { sample: 20, id: 9 }];
        let ep = EpochCollection::from_events(&buffer(), &events, ids(), 0.0, 0.2).unwrap();
        assert!(ep.is_empty());
    }

    #[test]
    fn test_baseline_zeroes_pre_event_mean() {
        let events = [EpochEvent { sample: 50, id: 1 }];
        let ep = EpochCollection::from_events(&buffer(), &events, ids(), -0.2, 0.2)
            .unwrap()
            .apply_baseline((None, Some(0.0)));
        // Ramp: samples 48, 49, 50 average to 49
        assert!((ep.data()[[0, 0, 0]] + 1.0).abs() < 1e-12);
        assert!((ep.data()[[0, 0, 4]] - 3.0).abs() < 1e-12);
        assert_eq!(ep.baseline(), Some((None, Some(0.0))));
    }

    #[test]
    fn test_select_condition() {
        let events = [
            EpochEvent { sample: 20, id: 1 },
            EpochEvent { sample: 40, id: 2 },
            EpochEvent { sample: 60, id: 1 },
        ];
        let ep = EpochCollection::from_events(&buffer(), &events, ids(), 0.0, 0.1).unwrap();
        let open = ep.clone().select("open").unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open.selection(), &[0, 2]);
        assert!(ep.select("blink").is_none());
    }

    #[test]
    fn test_average_and_grand_average() {
        let events = [EpochEvent { sample: 20, id: 1 }, EpochEvent { sample: 40, id: 1 }];
        let ep = EpochCollection::from_events(&buffer(), &events, ids(), 0.0, 0.1).unwrap();
        let avg = ep.average(ALL_CONDITIONS).unwrap();
        assert_eq!(avg.nave(), 2);
        assert_eq!(avg.data()[[0, 0]], 30.0);

        let ga = AveragedResponse::grand_average(vec![avg.clone(), avg]).unwrap();
        assert_eq!(ga.nave(), 4);
        assert_eq!(ga.data()[[1, 1]], 131.0);
        assert_eq!(ga.comment(), ALL_CONDITIONS);
    }

    #[test]
    fn test_average_of_nothing_is_error() {
        let ep = EpochCollection::from_events(&buffer(), &[], ids(), 0.0, 0.1).unwrap();
        assert!(ep.average("x").is_err());
    }

    #[test]
    fn test_concatenate_unions_conditions() {
        let a = EpochCollection::from_events(
            &buffer(),
            &[EpochEvent { sample: 20, id: 1 }],
            [("open".to_string(), 1)].into(),
            0.0,
            0.1,
        )
        .unwrap();
        let b = EpochCollection::from_events(
            &buffer(),
            &[EpochEvent { sample: 30, id: 2 }],
            [("close".to_string(), 2)].into(),
            0.0,
            0.1,
        )
        .unwrap();
        let both = EpochCollection::concatenate(vec![a, b]).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both.labels(), vec!["open", "close"]);

        let clash = EpochCollection::from_events(
            &buffer(),
            &[EpochEvent { sample: 30, id: 3 }],
            [("open".to_string(), 3)].into(),
            0.0,
            0.1,
        )
        .unwrap();
        assert!(EpochCollection::concatenate(vec![both, clash]).is_err());
    }
}
