//! Small descriptive-statistics helpers shared by the feature set and the
//! projection fit. All functions expect finite input; empty input yields 0.

use statrs::statistics::{Data, OrderStatistics, Statistics};

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().mean()
}

/// Sample variance (n - 1 denominator); 0 for fewer than two values
pub fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    data.iter().variance()
}

pub fn std_dev(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Linear-interpolation quantile (type 7) of already sorted data; statrs
/// only offers the type 8 estimator
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub fn sorted(data: &[f64]) -> Vec<f64> {
    let mut s = data.to_vec();
    s.sort_by(|a, b| a.total_cmp(b));
    s
}

pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    Data::new(data.to_vec()).median()
}

/// Median absolute deviation scaled to be consistent with the standard
/// deviation under normality
pub fn mad(data: &[f64]) -> f64 {
    let med = median(data);
    let deviations: Vec<f64> = data.iter().map(|v| (v - med).abs()).collect();
    1.4826 * median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moments() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&data) - 5.0).abs() < 1e-12);
        assert!((variance(&data) - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(variance(&[1.0]), 0.0);
    }

    #[test]
    fn test_quantiles() {
        let data = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(median(&data), 3.0);
        let s = sorted(&data);
        assert_eq!(quantile_sorted(&s, 0.25), 2.0);
        assert_eq!(quantile_sorted(&s, 0.0), 1.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn test_mad_ignores_outlier() {
        let data = [1.0, 2.0, 3.0, 4.0, 1000.0];
        assert!((mad(&data) - 1.4826).abs() < 1e-12);
    }
}
