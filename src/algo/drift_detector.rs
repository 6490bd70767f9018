//! Concept Drift Detector
//!
//! Two-sample test of density equality between the reference coordinates
//! and the projected points of a window. The statistic estimates the
//! integrated squared difference of the two densities:
//!
//! `T = ψ₁ + ψ₂ − ψ₁₂ − ψ₂₁`, where `ψᵢⱼ` is the mean of `f̂ᵢ` over sample j
//!
//! Each sample gets its own normal-scale bandwidth. Under equal densities
//! `T` is centered at the kernel self-contribution `μ_T`, and its spread is
//! estimated from the variance of each KDE at its own points. The one-sided
//! p-value comes from the standard normal.

use crate::algo::kde::KernelDensity;
use crate::algo::stats::variance;
use crate::error::{OddError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Outcome of one two-sample test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftTestResult {
    /// Integrated squared difference estimate (T)
    pub statistic: f64,
    /// Standardized statistic `(T − μ_T) / σ_T`
    pub z: f64,
    pub p_value: f64,
    pub n_reference: usize,
    pub n_window: usize,
}

impl DriftTestResult {
    /// Whether equality is rejected at significance `alpha`
    pub fn rejects(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// Test `f_reference = f_window` on two point sets of equal dimension
pub fn kde_two_sample_test(
    reference: &DMatrix<f64>,
    window: &DMatrix<f64>,
) -> Result<DriftTestResult> {
    let d = reference.ncols();
    if window.ncols() != d {
        return Err(OddError::DriftTestFailure(format!(
            "dimension mismatch: reference {} vs window {}",
            d,
            window.ncols()
        )));
    }
    let (n1, n2) = (reference.nrows(), window.nrows());
    let min_points = d + 2;
    if n1 < min_points || n2 < min_points {
        return Err(OddError::DriftTestFailure(format!(
            "need {} points per sample, got {} and {}",
            min_points, n1, n2
        )));
    }

    let fit = |x: &DMatrix<f64>| {
        KernelDensity::fit_normal_scale(x.clone())
            .map_err(|e| OddError::DriftTestFailure(format!("bandwidth: {}", e)))
    };
    let f1 = fit(reference)?;
    let f2 = fit(window)?;

    let at_own_1 = f1.evaluate_rows(reference);
    let at_own_2 = f2.evaluate_rows(window);
    let psi1 = mean(&at_own_1);
    let psi2 = mean(&at_own_2);
    let psi12 = mean(&f1.evaluate_rows(window));
    let psi21 = mean(&f2.evaluate_rows(reference));
    let statistic = psi1 + psi2 - psi12 - psi21;

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let bias = f1.kernel_peak() / n1f + f2.kernel_peak() / n2f;
    let pooled = (n1f * variance(&at_own_1) + n2f * variance(&at_own_2)) / (n1f + n2f);
    let var_t = 3.0 * pooled * (1.0 / n1f + 1.0 / n2f);
    let sd = var_t.sqrt();
    if !(sd.is_finite() && sd > 0.0) || !statistic.is_finite() {
        return Err(OddError::DriftTestFailure(
            "statistic variance is not positive".into(),
        ));
    }

    let z = (statistic - bias) / sd;
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| OddError::DriftTestFailure(format!("normal reference: {}", e)))?;
    let p_value = (1.0 - normal.cdf(z)).clamp(0.0, 1.0);

    Ok(DriftTestResult {
        statistic,
        z,
        p_value,
        n_reference: n1,
        n_window: n2,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
