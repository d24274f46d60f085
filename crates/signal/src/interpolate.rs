//! Bad-channel interpolation
//!
//! Spherical-spline interpolation from good to bad electrodes on the unit
//! sphere (Legendre expansion, `m = 4`, seven terms). Channels without a known
//! position fall back to the mean of the good channels.

use crate::buffer::{ChannelInfo, ChannelKind};
use crate::{Error, Result};
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayViewMut2, Axis};
use std::collections::BTreeSet;
use std::f64::consts::PI;

const SPLINE_ORDER: i32 = 4;
const LEGENDRE_TERMS: usize = 7;
const REGULARIZATION: f64 = 1e-5;
const PINV_EPS: f64 = 1e-12;

/// Linear map from good-channel rows to bad-channel rows
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    good: Vec<usize>,
    bad: Vec<usize>,
    /// `bad × good` weights
    weights: Array2<f64>,
    spline: bool,
}

impl Interpolation {
    /// Build the map for the given layout, or `None` when nothing is bad
    pub fn for_layout(channels: &[ChannelInfo], bads: &BTreeSet<String>) -> Result<Option<Self>> {
        let bad: Vec<usize> = channels
            .iter()
            .enumerate()
            .filter(|(_, c)| bads.contains(&c.name))
            .map(|(i, _)| i)
            .collect();
        if bad.is_empty() {
            return Ok(None);
        }
        let good: Vec<usize> = channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ChannelKind::Eeg && !bads.contains(&c.name))
            .map(|(i, _)| i)
            .collect();
        if good.is_empty() {
            return Err(Error::numeric(
                "interpolate_bads",
                "no good EEG channels to interpolate from",
            ));
        }

        let good_pos: Option<Vec<[f64; 3]>> = good.iter().map(|&i| unit(channels[i].position)).collect();
        let bad_pos: Option<Vec<[f64; 3]>> = bad.iter().map(|&i| unit(channels[i].position)).collect();

        let (weights, spline) = match (good_pos, bad_pos) {
            (Some(from), Some(to)) if from.len() >= 3 => (spline_matrix(&from, &to)?, true),
            _ => {
                tracing::info!(
                    n_bad = bad.len(),
                    "[interpolate] electrode positions missing -> mean of good channels"
                );
                let w = 1.0 / good.len() as f64;
                (Array2::from_elem((bad.len(), good.len()), w), false)
            }
        };
        Ok(Some(Self {
            good,
            bad,
            weights,
            spline,
        }))
    }

    /// Whether spherical splines (rather than the mean fallback) are used
    #[must_use]
    pub fn is_spline(&self) -> bool {
        self.spline
    }

    /// Overwrite the bad rows of a `channels × samples` block
    pub fn apply(&self, mut data: ArrayViewMut2<'_, f64>) {
        let sources = data.select(Axis(0), &self.good);
        let estimates = self.weights.dot(&sources);
        for (row, &target) in self.bad.iter().enumerate() {
            data.row_mut(target).assign(&estimates.row(row));
        }
    }
}

fn unit(position: Option<[f64; 3]>) -> Option<[f64; 3]> {
    let [x, y, z] = position?;
    let norm = (x * x + y * y + z * z).sqrt();
    (norm.is_finite() && norm > 0.0).then(|| [x / norm, y / norm, z / norm])
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).clamp(-1.0, 1.0)
}

/// Spline kernel g(cos θ) from the truncated Legendre series
fn spline_kernel(cosang: f64) -> f64 {
    let mut p_prev = 1.0;
    let mut p = cosang;
    let mut acc = 0.0;
    for n in 1..=LEGENDRE_TERMS {
        let nf = n as f64;
        acc += (2.0 * nf + 1.0) / (nf * (nf + 1.0)).powi(SPLINE_ORDER) * p;
        let next = ((2.0 * nf + 1.0) * cosang * p - nf * p_prev) / (nf + 1.0);
        p_prev = p;
        p = next;
    }
    acc / (4.0 * PI)
}

fn spline_matrix(from: &[[f64; 3]], to: &[[f64; 3]]) -> Result<Array2<f64>> {
    let n = from.len();
    let mut c = DMatrix::<f64>::zeros(n + 1, n + 1);
    for i in 0..n {
        for j in 0..n {
            c[(i, j)] = spline_kernel(dot(&from[i], &from[j]));
        }
        c[(i, i)] += REGULARIZATION;
        c[(i, n)] = 1.0;
        c[(n, i)] = 1.0;
    }
    let c_inv = c
        .pseudo_inverse(PINV_EPS)
        .map_err(|e| Error::numeric("interpolate_bads", e.to_string()))?;

    let mut g = DMatrix::<f64>::zeros(to.len(), n + 1);
    for (i, t) in to.iter().enumerate() {
        for (j, f) in from.iter().enumerate() {
            g[(i, j)] = spline_kernel(dot(t, f));
        }
        g[(i, n)] = 1.0;
    }
    let full = g * c_inv;
    Ok(Array2::from_shape_fn((to.len(), n), |(i, j)| full[(i, j)]))
}
