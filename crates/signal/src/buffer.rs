//! Continuous multichannel recordings
//!
//! A [`TimeSeriesBuffer`] owns a `channels × samples` matrix in volts plus
//! everything the cleaning stages annotate onto it: the bad-channel set,
//! time annotations, and the effective passband left by filtering.

use crate::{Error, Result};
use ndarray::{Array1, Array2, Axis, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Annotation prefix that marks a span as unusable
pub const BAD_PREFIX: &str = "bad";

/// Kind of signal a channel carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Scalp electrode
    #[default]
    Eeg,
    /// Ocular reference
    Eog,
    /// Trigger or stimulus line
    Stim,
    /// Anything else; never picked by the detectors
    Misc,
}

impl ChannelKind {
    /// Parse a BIDS `channels.tsv` type column
    #[must_use]
    pub fn from_bids(kind: &str) -> Self {
        match kind.trim().to_ascii_uppercase().as_str() {
            "EEG" => Self::Eeg,
            "EOG" | "HEOG" | "VEOG" => Self::Eog,
            "TRIG" | "STIM" => Self::Stim,
            _ => Self::Misc,
        }
    }
}

/// Per-channel metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel label, unique within a buffer
    pub name: String,
    /// Signal kind
    pub kind: ChannelKind,
    /// Electrode position in head coordinates (metres), when known
    pub position: Option<[f64; 3]>,
}

impl ChannelInfo {
    /// EEG channel without a known position
    #[must_use]
    pub fn eeg(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Eeg,
            position: None,
        }
    }

    /// Attach an electrode position
    #[must_use]
    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = Some(position);
        self
    }
}

/// A labelled time span, onset relative to the buffer start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Start in seconds
    pub onset: f64,
    /// Length in seconds
    pub duration: f64,
    /// Free-form label; a `bad` prefix excludes the span from analysis
    pub description: String,
}

impl Annotation {
    /// Create an annotation
    #[must_use]
    pub fn new(onset: f64, duration: f64, description: impl Into<String>) -> Self {
        Self {
            onset,
            duration,
            description: description.into(),
        }
    }

    /// Whether the span is marked unusable (case-insensitive `bad` prefix)
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.description
            .get(..BAD_PREFIX.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(BAD_PREFIX))
    }

    /// End of the span in seconds
    #[must_use]
    pub fn end(&self) -> f64 {
        self.onset + self.duration
    }
}

/// Continuous multichannel signal with bad-channel and annotation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBuffer {
    data: Array2<f64>,
    sfreq: f64,
    channels: Vec<ChannelInfo>,
    bads: BTreeSet<String>,
    annotations: Vec<Annotation>,
    highpass: f64,
    lowpass: f64,
}

impl TimeSeriesBuffer {
    /// Build a buffer from a `channels × samples` matrix
    pub fn new(data: Array2<f64>, sfreq: f64, channels: Vec<ChannelInfo>) -> Result<Self> {
        if !(sfreq.is_finite() && sfreq > 0.0) {
            return Err(Error::parameter("sfreq", format!("must be positive, got {sfreq}")));
        }
        if data.nrows() != channels.len() {
            return Err(Error::shape(format!(
                "{} data rows for {} channels",
                data.nrows(),
                channels.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for ch in &channels {
            if !seen.insert(ch.name.as_str()) {
                return Err(Error::shape(format!("duplicate channel '{}'", ch.name)));
            }
        }
        Ok(Self {
            data,
            sfreq,
            channels,
            bads: BTreeSet::new(),
            annotations: Vec::new(),
            highpass: 0.0,
            lowpass: sfreq / 2.0,
        })
    }

    /// Sampling rate in Hz
    #[must_use]
    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    /// Number of channels
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples per channel
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Duration in seconds
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.n_samples() as f64 / self.sfreq
    }

    /// Sample times in seconds
    #[must_use]
    pub fn times(&self) -> Array1<f64> {
        Array1::from_iter((0..self.n_samples()).map(|i| i as f64 / self.sfreq))
    }

    /// Signal matrix
    #[must_use]
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Mutable signal matrix; the shape must be preserved
    pub fn data_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    /// Channel metadata in row order
    #[must_use]
    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    /// Channel names in row order
    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Row index of a channel
    #[must_use]
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    /// Channels currently marked bad
    #[must_use]
    pub fn bads(&self) -> &BTreeSet<String> {
        &self.bads
    }

    /// Whether a channel is marked bad
    #[must_use]
    pub fn is_bad(&self, name: &str) -> bool {
        self.bads.contains(name)
    }

    /// Add channels to the bad set; unknown names are rejected
    pub fn mark_bad<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if self.channel_index(&name).is_none() {
                return Err(Error::UnknownChannel { name });
            }
            self.bads.insert(name);
        }
        Ok(())
    }

    /// Forget every bad-channel mark
    pub fn clear_bads(&mut self) {
        self.bads.clear();
    }

    /// Annotations in insertion order
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Append annotations
    pub fn annotate(&mut self, annotations: impl IntoIterator<Item = Annotation>) {
        self.annotations.extend(annotations);
    }

    /// Effective high-pass edge in Hz (0 when unfiltered)
    #[must_use]
    pub fn highpass(&self) -> f64 {
        self.highpass
    }

    /// Effective low-pass edge in Hz (Nyquist when unfiltered)
    #[must_use]
    pub fn lowpass(&self) -> f64 {
        self.lowpass
    }

    /// Record the passband left by a filter pass
    pub fn set_passband(&mut self, highpass: f64, lowpass: f64) {
        self.highpass = highpass.max(0.0);
        self.lowpass = lowpass.min(self.sfreq / 2.0);
    }

    /// Attach electrode positions by channel name
    pub fn set_positions<'a>(&mut self, positions: impl IntoIterator<Item = (&'a str, [f64; 3])>) {
        for (name, pos) in positions {
            if let Some(ch) = self.channels.iter_mut().find(|c| c.name == name) {
                ch.position = Some(pos);
            }
        }
    }

    /// Replace the samples and rate, keeping channels, bads and annotations
    ///
    /// Annotation onsets are in seconds and stay valid across a rate change.
    pub fn with_samples(mut self, data: Array2<f64>, sfreq: f64) -> Result<Self> {
        if data.nrows() != self.channels.len() {
            return Err(Error::shape(format!(
                "{} data rows for {} channels",
                data.nrows(),
                self.channels.len()
            )));
        }
        if !(sfreq.is_finite() && sfreq > 0.0) {
            return Err(Error::parameter("sfreq", format!("must be positive, got {sfreq}")));
        }
        self.lowpass = self.lowpass.min(sfreq / 2.0);
        self.data = data;
        self.sfreq = sfreq;
        Ok(self)
    }

    /// Row indices of EEG channels, optionally skipping bad ones
    #[must_use]
    pub fn eeg_picks(&self, exclude_bads: bool) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ChannelKind::Eeg)
            .filter(|(_, c)| !(exclude_bads && self.bads.contains(&c.name)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Per-sample mask, `false` inside any `bad*` annotation
    #[must_use]
    pub fn good_sample_mask(&self) -> Vec<bool> {
        let n = self.n_samples();
        let mut mask = vec![true; n];
        for ann in self.annotations.iter().filter(|a| a.is_bad()) {
            let start = (ann.onset * self.sfreq).round().max(0.0) as usize;
            let stop = ((ann.end() * self.sfreq).round().max(0.0) as usize).min(n);
            if start < stop {
                mask[start..stop].iter_mut().for_each(|m| *m = false);
            }
        }
        mask
    }

    /// Rows `picks`, with samples under bad annotations optionally omitted
    #[must_use]
    pub fn data_for(&self, picks: &[usize], omit_bad_spans: bool) -> Array2<f64> {
        let rows = self.data.select(Axis(0), picks);
        if !omit_bad_spans {
            return rows;
        }
        let mask = self.good_sample_mask();
        if mask.iter().all(|&m| m) {
            return rows;
        }
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        rows.select(Axis(1), &keep)
    }

    /// Keep the samples between `tmin` and `tmax` seconds (inclusive)
    ///
    /// Annotations are shifted to the new origin; those entirely outside the
    /// kept span are dropped and the rest are clipped to it.
    pub fn crop(mut self, tmin: f64, tmax: f64) -> Result<Self> {
        if !(tmin.is_finite() && tmax.is_finite()) || tmin < 0.0 || tmax < tmin {
            return Err(Error::parameter(
                "crop",
                format!("invalid range [{tmin}, {tmax}] for {:.3}s of data", self.duration()),
            ));
        }
        let n = self.n_samples();
        if n == 0 {
            return Ok(self);
        }
        let start = ((tmin * self.sfreq).round() as usize).min(n - 1);
        let stop = ((tmax * self.sfreq).round() as usize).min(n - 1);
        self.data = self.data.slice(s![.., start..=stop]).to_owned();

        let t0 = start as f64 / self.sfreq;
        let t1 = (stop + 1) as f64 / self.sfreq;
        self.annotations = self
            .annotations
            .into_iter()
            .filter(|a| a.end() >= t0 && a.onset <= t1)
            .map(|a| {
                let onset = a.onset.max(t0);
                let end = a.end().min(t1);
                Annotation::new(onset - t0, (end - onset).max(0.0), a.description)
            })
            .collect();
        Ok(self)
    }

    /// Keep only the named channels, in the given order
    pub fn pick(mut self, names: &[&str]) -> Result<Self> {
        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.channel_index(name).ok_or_else(|| Error::UnknownChannel {
                name: (*name).to_string(),
            })?;
            rows.push(idx);
        }
        self.select_rows(&rows);
        Ok(self)
    }

    /// Drop the named channels if present
    #[must_use]
    pub fn drop_channels(mut self, names: &[&str]) -> Self {
        let rows: Vec<usize> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| !names.contains(&c.name.as_str()))
            .map(|(i, _)| i)
            .collect();
        self.select_rows(&rows);
        self
    }

    fn select_rows(&mut self, rows: &[usize]) {
        self.data = self.data.select(Axis(0), rows);
        self.channels = rows.iter().map(|&i| self.channels[i].clone()).collect();
        let kept: BTreeSet<&str> = self.channels.iter().map(|c| c.name.as_str()).collect();
        self.bads.retain(|b| kept.contains(b.as_str()));
    }

    /// Join recordings end to end
    ///
    /// All inputs must share channel names and sampling rate. Bad sets are
    /// unioned and annotations are shifted by the preceding durations.
    pub fn concatenate(buffers: Vec<Self>) -> Result<Self> {
        let mut iter = buffers.into_iter();
        let mut out = iter.next().ok_or(Error::Empty {
            operation: "concatenate",
        })?;
        for next in iter {
            if next.channel_names() != out.channel_names() {
                return Err(Error::incompatible("channel sets differ"));
            }
            if (next.sfreq - out.sfreq).abs() > 1e-6 {
                return Err(Error::incompatible(format!(
                    "sampling rates differ ({} vs {})",
                    out.sfreq, next.sfreq
                )));
            }
            let offset = out.duration();
            out.data = ndarray::concatenate(Axis(1), &[out.data.view(), next.data.view()])
                .map_err(|e| Error::shape(e.to_string()))?;
            out.annotations
                .extend(next.annotations.into_iter().map(|a| Annotation {
                    onset: a.onset + offset,
                    ..a
                }));
            out.bads.extend(next.bads);
            out.highpass = out.highpass.max(next.highpass);
            out.lowpass = out.lowpass.min(next.lowpass);
        }
        Ok(out)
    }
}
