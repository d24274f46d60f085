//! Zero-phase IIR filtering
//!
//! Butterworth high/low-pass and notch sections built as cascaded biquads
//! (bilinear transform with pre-warping), applied forward and backward so the
//! result has no phase shift.

use crate::buffer::{ChannelKind, TimeSeriesBuffer};
use crate::{Error, Result};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Butterworth order used for each band edge
pub const BUTTERWORTH_ORDER: usize = 4;

/// Quality factor of the line-noise notch
pub const NOTCH_Q: f64 = 30.0;

/// Second-order section, coefficients normalised so `a0 == 1`
#[derive(Clone, Debug, PartialEq)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 3],
}

impl Biquad {
    fn normalised(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [1.0, a[1] / a0, a[2] / a0],
        }
    }

    /// Second-order low-pass section
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalised(
            [(1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// Second-order high-pass section
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalised(
            [(1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// Notch section for power line interference
    #[must_use]
    pub fn notch(sample_rate: f64, notch_freq: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * notch_freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalised([1.0, -2.0 * cos, 1.0], [1.0 + alpha, -2.0 * cos, 1.0 - alpha])
    }

    /// Gain at DC
    #[must_use]
    pub fn dc_gain(&self) -> f64 {
        let den: f64 = self.a.iter().sum();
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            self.b.iter().sum::<f64>() / den
        }
    }

    /// State that makes a constant input `x0` produce a constant output
    fn steady_state(&self, x0: f64) -> [f64; 2] {
        let y0 = self.dc_gain() * x0;
        let z2 = self.b[2] * x0 - self.a[2] * y0;
        let z1 = self.b[1] * x0 - self.a[1] * y0 + z2;
        [z1, z2]
    }

    /// Filter `signal` in place (transposed direct form II)
    fn run(&self, signal: &mut [f64], mut state: [f64; 2]) {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        for x in signal.iter_mut() {
            let input = *x;
            let y = b0 * input + state[0];
            state[0] = b1 * input - a1 * y + state[1];
            state[1] = b2 * input - a2 * y;
            *x = y;
        }
    }
}

/// Cascade of second-order sections
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cascade {
    sections: Vec<Biquad>,
}

fn butterworth_qs(order: usize) -> impl Iterator<Item = f64> {
    let n = order.max(2) / 2 * 2;
    (0..n / 2).map(move |k| 1.0 / (2.0 * ((2 * k + 1) as f64 * PI / (2 * n) as f64).cos()))
}

impl Cascade {
    /// Butterworth low-pass of even `order`
    #[must_use]
    pub fn butterworth_lowpass(sample_rate: f64, cutoff: f64, order: usize) -> Self {
        Self {
            sections: butterworth_qs(order)
                .map(|q| Biquad::lowpass(sample_rate, cutoff, q))
                .collect(),
        }
    }

    /// Butterworth high-pass of even `order`
    #[must_use]
    pub fn butterworth_highpass(sample_rate: f64, cutoff: f64, order: usize) -> Self {
        Self {
            sections: butterworth_qs(order)
                .map(|q| Biquad::highpass(sample_rate, cutoff, q))
                .collect(),
        }
    }

    /// Single notch section
    #[must_use]
    pub fn notch(sample_rate: f64, freq: f64, q: f64) -> Self {
        Self {
            sections: vec![Biquad::notch(sample_rate, freq, q)],
        }
    }

    /// Append the sections of another cascade
    #[must_use]
    pub fn then(mut self, other: Self) -> Self {
        self.sections.extend(other.sections);
        self
    }

    /// Whether the cascade has no sections
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let mut x0 = first;
        for section in &self.sections {
            section.run(signal, section.steady_state(x0));
            x0 *= section.dc_gain();
        }
    }

    /// Forward-backward filtering with odd-reflection padding
    #[must_use]
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 || self.sections.is_empty() {
            return signal.to_vec();
        }
        let pad = (3 * (2 * self.sections.len() + 1)).min(n - 1);

        let first = signal[0];
        let last = signal[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        self.run(&mut ext);
        ext.reverse();
        self.run(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }
}

/// Apply `cascade` zero-phase to every EEG/EOG row of the buffer
fn apply_rows(buffer: &mut TimeSeriesBuffer, cascade: &Cascade) {
    let rows: Vec<usize> = buffer
        .channels()
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.kind, ChannelKind::Eeg | ChannelKind::Eog))
        .map(|(i, _)| i)
        .collect();
    let data = buffer.data();
    let filtered: Vec<(usize, Vec<f64>)> = rows
        .par_iter()
        .map(|&r| (r, cascade.filtfilt(&data.row(r).to_vec())))
        .collect();
    let data = buffer.data_mut();
    for (r, values) in filtered {
        for (dst, src) in data.row_mut(r).iter_mut().zip(values) {
            *dst = src;
        }
    }
}

/// Zero-phase Butterworth band-pass
///
/// Each edge is skipped when unset, non-positive or at/above Nyquist. The
/// buffer's recorded passband is narrowed to the edges actually applied.
pub fn band_pass(
    mut buffer: TimeSeriesBuffer,
    l_freq: Option<f64>,
    h_freq: Option<f64>,
) -> Result<TimeSeriesBuffer> {
    let sfreq = buffer.sfreq();
    let nyquist = sfreq / 2.0;
    let usable = |f: Option<f64>| f.filter(|f| f.is_finite() && *f > 0.0 && *f < nyquist);
    let low = usable(l_freq);
    let high = usable(h_freq);
    if let (Some(l), Some(h)) = (low, high)
        && l >= h
    {
        return Err(Error::parameter(
            "l_freq",
            format!("high-pass edge {l} Hz must be below low-pass edge {h} Hz"),
        ));
    }

    let mut cascade = Cascade::default();
    if let Some(l) = low {
        cascade = cascade.then(Cascade::butterworth_highpass(sfreq, l, BUTTERWORTH_ORDER));
    }
    if let Some(h) = high {
        cascade = cascade.then(Cascade::butterworth_lowpass(sfreq, h, BUTTERWORTH_ORDER));
    }
    if cascade.is_empty() {
        tracing::debug!(?l_freq, ?h_freq, sfreq, "[filter] no usable band edges");
        return Ok(buffer);
    }

    apply_rows(&mut buffer, &cascade);
    let hp = low.unwrap_or_else(|| buffer.highpass()).max(buffer.highpass());
    let lp = high.unwrap_or_else(|| buffer.lowpass()).min(buffer.lowpass());
    buffer.set_passband(hp, lp);
    Ok(buffer)
}

/// Zero-phase notch at `freq` Hz; a no-op at or above Nyquist
#[must_use]
pub fn notch(mut buffer: TimeSeriesBuffer, freq: f64) -> TimeSeriesBuffer {
    let sfreq = buffer.sfreq();
    if !(freq.is_finite() && freq > 0.0 && freq < sfreq / 2.0) {
        tracing::info!(freq, sfreq, "[filter] notch outside usable range -> skip");
        return buffer;
    }
    apply_rows(&mut buffer, &Cascade::notch(sfreq, freq, NOTCH_Q));
    buffer
}
