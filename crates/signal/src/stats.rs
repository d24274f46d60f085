//! NaN-aware summary statistics shared by the detectors

/// Mean of the finite values, NaN when there are none
#[must_use]
pub fn nanmean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Population standard deviation of the finite values
#[must_use]
pub fn nanstd(values: &[f64]) -> f64 {
    let mu = nanmean(values);
    if mu.is_nan() {
        return f64::NAN;
    }
    let (ss, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - mu).powi(2), n + 1));
    (ss / n as f64).sqrt()
}

/// Z-score against the finite values; a zero spread yields all NaN
#[must_use]
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let mu = nanmean(values);
    let sd = nanstd(values);
    if !(sd.is_finite() && sd > 0.0) {
        return vec![f64::NAN; values.len()];
    }
    values.iter().map(|v| (v - mu) / sd).collect()
}

/// Median of the finite values, NaN when there are none
#[must_use]
pub fn nanmedian(values: &[f64]) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        f64::midpoint(finite[mid - 1], finite[mid])
    } else {
        finite[mid]
    }
}

/// Pearson correlation over the positions where both inputs are finite
///
/// Returns `None` when fewer than `min_pairs` pairs remain or either side
/// has zero variance.
#[must_use]
pub fn pearson(x: &[f64], y: &[f64], min_pairs: usize) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect();
    if pairs.len() < min_pairs || pairs.is_empty() {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    (denom > 0.0).then(|| sxy / denom)
}

/// Sums of `values` over every window of `win` consecutive samples
///
/// Returns `len - win + 1` sums (empty when the input is shorter than `win`).
#[must_use]
pub fn sliding_sums(values: &[f64], win: usize) -> Vec<f64> {
    if win == 0 || values.len() < win {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - win + 1);
    let mut acc: f64 = values[..win].iter().sum();
    out.push(acc);
    for i in win..values.len() {
        acc += values[i] - values[i - win];
        out.push(acc);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_aware_moments() {
        let v = [1.0, f64::NAN, 3.0];
        assert!((nanmean(&v) - 2.0).abs() < 1e-12);
        assert!((nanstd(&v) - 1.0).abs() < 1e-12);
        assert!(nanmean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_zscore_zero_spread_is_nan() {
        assert!(zscore(&[2.0, 2.0, 2.0]).iter().all(|z| z.is_nan()));
        let z = zscore(&[1.0, 3.0]);
        assert!((z[0] + 1.0).abs() < 1e-12);
        assert!((z[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert!((nanmedian(&[3.0, 1.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((nanmedian(&[4.0, 1.0, 2.0, 3.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_pearson() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| -2.0 * v + 1.0).collect();
        assert!((pearson(&x, &y, 10).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson(&x[..5], &y[..5], 10).is_none());
        assert!(pearson(&x, &[1.0; 20], 10).is_none());
    }

    #[test]
    fn test_sliding_sums() {
        assert_eq!(sliding_sums(&[1.0, 2.0, 3.0, 4.0], 2), vec![3.0, 5.0, 7.0]);
        assert!(sliding_sums(&[1.0], 2).is_empty());
    }
}
