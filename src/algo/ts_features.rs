//! Default per-series feature set
//!
//! Fourteen descriptive statistics that characterise the level, spread,
//! shape and local stability of a series:
//! - Location/spread: mean, variance, minimum, maximum
//! - Stability: lumpiness, level shift, variance change (rolling width `w`)
//! - Trend shape: linearity, curvature (orthonormal polynomial fit)
//! - Tails: spikiness, burstiness, third moment, mean/IQ-mean ratio,
//!   high/low mean ratio
//!
//! Series are summarised independently, in parallel.

use crate::algo::stats::{mean, quantile_sorted, sorted, variance};
use crate::error::Result;
use crate::features::{FeatureExtractor, FeatureMatrix};
use crate::series::TimeSeriesCollection;
use rayon::prelude::*;

pub const NUM_FEATURES: usize = 14;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "mean",
    "variance",
    "lumpiness",
    "level_shift",
    "variance_change",
    "linearity",
    "curvature",
    "spikiness",
    "burstiness",
    "minimum",
    "maximum",
    "mean_iq_ratio",
    "moment3",
    "high_low_ratio",
];

/// Denominators smaller than this make a ratio feature fall back to 0
const RATIO_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsFeatures {
    width: usize,
}

impl Default for TsFeatures {
    fn default() -> Self {
        Self::new(10)
    }
}

impl TsFeatures {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(2),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Fewest observed points a series needs to be summarised
    pub fn min_points(&self) -> usize {
        2 * self.width
    }

    /// Features of one series of observed values, `None` if too short
    pub fn compute(&self, x: &[f64]) -> Option<[f64; NUM_FEATURES]> {
        if x.len() < self.min_points() {
            return None;
        }

        let w = self.width;
        let mu = mean(x);
        let var = variance(x);
        let s = sorted(x);
        let (linearity, curvature, remainder) = quadratic_trend(x);

        Some([
            mu,
            var,
            lumpiness(x, w),
            max_rolling_shift(&rolling(x, w, mean), w),
            max_rolling_shift(&rolling(x, w, variance), w),
            linearity,
            curvature,
            spikiness(&remainder),
            ratio_or_zero(var, mu.abs()),
            s[0],
            s[s.len() - 1],
            ratio_or_zero(mu, interquartile_mean(&s)),
            x.iter().map(|v| (v - mu).powi(3)).sum::<f64>() / x.len() as f64,
            high_low_ratio(x, mu),
        ])
    }
}

impl FeatureExtractor for TsFeatures {
    fn names(&self) -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn extract(&self, collection: &TimeSeriesCollection) -> Result<FeatureMatrix> {
        let rows: Vec<Option<Vec<f64>>> = (0..collection.num_series())
            .into_par_iter()
            .map(|i| self.compute(&collection.observed(i)).map(|f| f.to_vec()))
            .collect();
        FeatureMatrix::from_rows(self.names(), rows)
    }

    fn dim(&self) -> usize {
        NUM_FEATURES
    }
}

fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if den.abs() < RATIO_EPS { 0.0 } else { num / den }
}

/// Variance of the variances of non-overlapping tiles
fn lumpiness(x: &[f64], w: usize) -> f64 {
    let tile_vars: Vec<f64> = x
        .chunks(w)
        .filter(|tile| tile.len() >= 2)
        .map(variance)
        .collect();
    variance(&tile_vars)
}

/// `stat` over every length-`w` sliding window
fn rolling(x: &[f64], w: usize, stat: fn(&[f64]) -> f64) -> Vec<f64> {
    x.windows(w).map(stat).collect()
}

/// Largest absolute change between rolling values `w` steps apart
fn max_rolling_shift(rolled: &[f64], w: usize) -> f64 {
    rolled
        .iter()
        .zip(rolled.iter().skip(w))
        .map(|(a, b)| (b - a).abs())
        .fold(0.0, f64::max)
}

/// Coefficients of the first two orthonormal polynomial trends and the
/// residual after removing the mean and both trends
fn quadratic_trend(x: &[f64]) -> (f64, f64, Vec<f64>) {
    let n = x.len();
    let t: Vec<f64> = (0..n).map(|i| i as f64).collect();

    let p1 = orthonormalize(&t, &[]);
    let t2: Vec<f64> = t.iter().map(|v| v * v).collect();
    let p2 = orthonormalize(&t2, &[&p1]);

    let b1 = dot(x, &p1);
    let b2 = dot(x, &p2);
    let mu = mean(x);
    let remainder = (0..n).map(|i| x[i] - mu - b1 * p1[i] - b2 * p2[i]).collect();
    (b1, b2, remainder)
}

/// Center `v`, remove its projection on the (orthonormal) `basis`, and scale to unit norm
fn orthonormalize(v: &[f64], basis: &[&Vec<f64>]) -> Vec<f64> {
    let mu = mean(v);
    let mut out: Vec<f64> = v.iter().map(|a| a - mu).collect();
    for b in basis {
        let proj = dot(&out, b);
        for (o, bi) in out.iter_mut().zip(b.iter()) {
            *o -= proj * bi;
        }
    }
    let norm = dot(&out, &out).sqrt();
    if norm > 0.0 {
        out.iter_mut().for_each(|o| *o /= norm);
    }
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Variance of the leave-one-out variances
fn spikiness(e: &[f64]) -> f64 {
    let n = e.len();
    if n < 3 {
        return 0.0;
    }
    let sum: f64 = e.iter().sum();
    let sum_sq: f64 = e.iter().map(|v| v * v).sum();
    let k = (n - 1) as f64;
    let loo: Vec<f64> = e
        .iter()
        .map(|v| {
            let s = sum - v;
            let q = sum_sq - v * v;
            (q - s * s / k) / (k - 1.0)
        })
        .collect();
    variance(&loo)
}

/// Mean of the values between the first and third quartiles
fn interquartile_mean(sorted: &[f64]) -> f64 {
    let q1 = quantile_sorted(sorted, 0.25);
    let q3 = quantile_sorted(sorted, 0.75);
    let inner: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| *v >= q1 && *v <= q3)
        .collect();
    mean(&inner)
}

fn high_low_ratio(x: &[f64], mu: f64) -> f64 {
    let high: Vec<f64> = x.iter().copied().filter(|v| *v > mu).collect();
    let low: Vec<f64> = x.iter().copied().filter(|v| *v < mu).collect();
    if high.is_empty() || low.is_empty() {
        return 0.0;
    }
    ratio_or_zero(mean(&high), mean(&low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(10.0, 3.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    #[test]
    fn test_short_series_excluded() {
        let f = TsFeatures::new(10);
        assert!(f.compute(&[1.0; 19]).is_none());
        assert!(f.compute(&noise(20, 1)).is_some());
    }

    #[test]
    fn test_linear_series() {
        let f = TsFeatures::new(5);
        let x: Vec<f64> = (0..50).map(|i| 2.0 * i as f64 + 1.0).collect();
        let feats = f.compute(&x).unwrap();

        assert!(feats[5] > 0.0, "linearity should be positive");
        assert!(feats[6].abs() < 1e-6, "curvature of a line should vanish");
        assert!(feats[7].abs() < 1e-12, "no remainder, no spikes");
        assert_eq!(feats[9], 1.0);
        assert_eq!(feats[10], 99.0);
        // Rolling means move by 2 per step, 5 steps apart
        assert!((feats[3] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_scaling_moves_location_and_spread() {
        let f = TsFeatures::default();
        let x = noise(250, 7);
        let doubled: Vec<f64> = x.iter().map(|v| v * 2.0).collect();
        let a = f.compute(&x).unwrap();
        let b = f.compute(&doubled).unwrap();

        assert!((b[0] - 2.0 * a[0]).abs() < 1e-9);
        assert!((b[1] - 4.0 * a[1]).abs() < 1e-6);
        assert!((b[12] - 8.0 * a[12]).abs() < 1e-6);
        // Scale-free ratios are unchanged
        assert!((b[11] - a[11]).abs() < 1e-9);
        assert!((b[13] - a[13]).abs() < 1e-9);
    }

    #[test]
    fn test_extract_marks_missing_series() {
        let good = noise(40, 3);
        let missing = vec![f64::NAN; 40];
        let c = TimeSeriesCollection::from_columns(&[good.clone(), missing, good]).unwrap();
        let fm = TsFeatures::default().extract(&c).unwrap();

        assert_eq!(fm.num_series(), 3);
        assert_eq!(fm.dim(), NUM_FEATURES);
        assert_eq!(fm.included(), vec![0, 2]);
        assert_eq!(fm.row(0), fm.row(2));
    }
}
