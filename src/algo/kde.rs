//! Gaussian-kernel multivariate density estimation
//!
//! `f̂(x) = n⁻¹ Σᵢ φ_H(x − Xᵢ)` with a full bandwidth matrix H.
//! Points are whitened once by the Cholesky factor of H so every
//! evaluation is a sum of `exp(−½‖y‖²)` terms.
//!
//! Bandwidth selectors:
//! - Normal scale: `H = (4 / ((d + 2) n))^(2/(d+4)) · S`
//! - Smoothed cross-validation over the family `H = h² · S`

use crate::error::{OddError, Result};
use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Grid points of the coarse SCV scan
const SCV_GRID: usize = 41;
/// Golden-section refinement steps after the scan
const SCV_REFINE_ITER: usize = 60;
const INV_PHI: f64 = 0.618_033_988_749_895;

/// Fitted density over a fixed set of points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "KdeParts", try_from = "KdeParts")]
pub struct KernelDensity {
    points: DMatrix<f64>,
    bandwidth: DMatrix<f64>,
    /// Points multiplied by L⁻¹ (H = L Lᵀ), one row each
    whitened: DMatrix<f64>,
    whitening: DMatrix<f64>,
    /// 1 / (n (2π)^(d/2) |H|^(1/2))
    norm: f64,
}

#[derive(Serialize, Deserialize)]
struct KdeParts {
    points: DMatrix<f64>,
    bandwidth: DMatrix<f64>,
}

impl From<KernelDensity> for KdeParts {
    fn from(kde: KernelDensity) -> Self {
        Self {
            points: kde.points,
            bandwidth: kde.bandwidth,
        }
    }
}

impl TryFrom<KdeParts> for KernelDensity {
    type Error = OddError;

    fn try_from(parts: KdeParts) -> Result<Self> {
        KernelDensity::new(parts.points, parts.bandwidth)
    }
}

impl PartialEq for KernelDensity {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points && self.bandwidth == other.bandwidth
    }
}

impl KernelDensity {
    /// Density over `points` (n × d) with bandwidth matrix `bandwidth` (d × d)
    pub fn new(points: DMatrix<f64>, bandwidth: DMatrix<f64>) -> Result<Self> {
        let (n, d) = points.shape();
        if n == 0 || d == 0 {
            return Err(OddError::numeric("density needs at least one point"));
        }
        if bandwidth.shape() != (d, d) {
            return Err(OddError::InvalidInput(format!(
                "bandwidth is {:?}, expected {}x{}",
                bandwidth.shape(),
                d,
                d
            )));
        }
        if points.iter().chain(bandwidth.iter()).any(|v| !v.is_finite()) {
            return Err(OddError::numeric("non-finite density input"));
        }

        let chol = Cholesky::new(bandwidth.clone())
            .ok_or_else(|| OddError::numeric("bandwidth matrix is not positive definite"))?;
        let l = chol.l();
        let det_sqrt: f64 = l.diagonal().iter().product();
        let whitening = l
            .try_inverse()
            .ok_or_else(|| OddError::numeric("bandwidth matrix is singular"))?;
        let whitened = &points * whitening.transpose();
        let norm = 1.0 / (n as f64 * (2.0 * PI).powf(d as f64 / 2.0) * det_sqrt);
        if !(norm.is_finite() && norm > 0.0) {
            return Err(OddError::numeric("degenerate bandwidth determinant"));
        }

        Ok(Self {
            points,
            bandwidth,
            whitened,
            whitening,
            norm,
        })
    }

    /// Density with an SCV-selected bandwidth
    pub fn fit_scv(points: DMatrix<f64>) -> Result<Self> {
        let h = scv_bandwidth(&points)?;
        Self::new(points, h)
    }

    /// Density with the normal-scale bandwidth
    pub fn fit_normal_scale(points: DMatrix<f64>) -> Result<Self> {
        let h = normal_scale_bandwidth(&points)?;
        Self::new(points, h)
    }

    pub fn points(&self) -> &DMatrix<f64> {
        &self.points
    }

    pub fn bandwidth(&self) -> &DMatrix<f64> {
        &self.bandwidth
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.points.ncols()
    }

    /// |H|^(-1/2) (2π)^(-d/2), the kernel height at zero
    pub fn kernel_peak(&self) -> f64 {
        self.norm * self.len() as f64
    }

    /// f̂(x) at a single point of length d
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        // Undefined off the finite domain; exp(-inf) would report zero
        if x.iter().any(|v| !v.is_finite()) {
            return f64::NAN;
        }
        let y = &self.whitening * DVector::from_column_slice(x);
        let mut sum = 0.0;
        for row in self.whitened.row_iter() {
            let mut sq = 0.0;
            for (a, b) in row.iter().zip(y.iter()) {
                let diff = a - b;
                sq += diff * diff;
            }
            sum += (-0.5 * sq).exp();
        }
        self.norm * sum
    }

    /// f̂ at every row of `x` (r × d)
    pub fn evaluate_rows(&self, x: &DMatrix<f64>) -> Vec<f64> {
        (0..x.nrows())
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                self.evaluate(&row)
            })
            .collect()
    }

    /// Density on a regular grid spanning the points plus three bandwidth
    /// standard deviations; two-dimensional models only
    pub fn grid(&self, resolution: usize) -> Option<DensityGrid> {
        if self.dim() != 2 || resolution < 2 {
            return None;
        }
        let axis = |j: usize| {
            let col = self.points.column(j);
            let pad = 3.0 * self.bandwidth[(j, j)].sqrt();
            let lo = col.min() - pad;
            let hi = col.max() + pad;
            let step = (hi - lo) / (resolution - 1) as f64;
            (0..resolution).map(|i| lo + step * i as f64).collect::<Vec<_>>()
        };
        let xs = axis(0);
        let ys = axis(1);
        let mut values = Vec::with_capacity(resolution * resolution);
        for y in &ys {
            for x in &xs {
                values.push(self.evaluate(&[*x, *y]));
            }
        }
        Some(DensityGrid { xs, ys, values })
    }
}

/// Density values on a regular 2-D grid, row-major over `ys` then `xs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub values: Vec<f64>,
}

/// Sample covariance (n − 1 denominator) of the rows of `points`
pub fn sample_covariance(points: &DMatrix<f64>) -> DMatrix<f64> {
    let n = points.nrows();
    let mean = points.row_mean();
    let mut centered = points.clone();
    for mut row in centered.row_iter_mut() {
        row -= &mean;
    }
    (centered.transpose() * centered) / (n as f64 - 1.0).max(1.0)
}

/// `H = (4 / ((d + 2) n))^(2/(d+4)) · S`
pub fn normal_scale_bandwidth(points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (n, d) = points.shape();
    if n < 2 {
        return Err(OddError::numeric("normal-scale bandwidth needs two points"));
    }
    Ok(sample_covariance(points) * normal_scale_factor(n, d))
}

fn normal_scale_factor(n: usize, d: usize) -> f64 {
    let d = d as f64;
    (4.0 / ((d + 2.0) * n as f64)).powf(2.0 / (d + 4.0))
}

/// Smoothed cross-validation bandwidth `h² · S`
///
/// The criterion is evaluated in coordinates sphered by S, where both the
/// candidate and the normal-scale pilot are scalar multiples of identity.
pub fn scv_bandwidth(points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (n, d) = points.shape();
    if n <= d {
        return Err(OddError::numeric(format!(
            "SCV bandwidth needs more than {} points, got {}",
            d, n
        )));
    }

    let s = sample_covariance(points);
    let chol = Cholesky::new(s.clone())
        .ok_or_else(|| OddError::numeric("reference covariance is singular"))?;

    // Squared Mahalanobis distance of every unordered pair; the diagonal
    // (distance zero) is added separately with multiplicity n
    let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let r: DVector<f64> = (points.row(i) - points.row(j)).transpose();
            pairs.push(r.dot(&chol.solve(&r)));
        }
    }

    let dim = d as f64;
    let nf = n as f64;
    let g2 = (2.0 / (dim + 4.0)).powf(2.0 / (dim + 6.0)) * nf.powf(-2.0 / (dim + 6.0));
    let phi = |r: f64, a: f64| (2.0 * PI * a).powf(-dim / 2.0) * (-r / (2.0 * a)).exp();
    let criterion = |h2: f64| {
        let term = |r: f64| {
            phi(r, 2.0 * h2 + 2.0 * g2) - 2.0 * phi(r, h2 + 2.0 * g2) + phi(r, 2.0 * g2)
        };
        let off: f64 = pairs.iter().map(|&r| term(r)).sum();
        let sum = nf * term(0.0) + 2.0 * off;
        (4.0 * PI).powf(-dim / 2.0) * h2.powf(-dim / 2.0) / nf + sum / (nf * nf)
    };

    let h_ns = normal_scale_factor(n, d);
    let (lo, hi) = ((h_ns / 25.0).ln(), (h_ns * 9.0).ln());
    let step = (hi - lo) / (SCV_GRID - 1) as f64;
    let grid: Vec<f64> = (0..SCV_GRID).map(|i| lo + step * i as f64).collect();
    let values: Vec<f64> = grid.iter().map(|&g| criterion(g.exp())).collect();

    let best = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .ok_or_else(|| OddError::numeric("SCV criterion is not finite"))?;

    let a = grid[best.saturating_sub(1)];
    let b = grid[(best + 1).min(SCV_GRID - 1)];
    let log_h2 = golden_section(|g| criterion(g.exp()), a, b);
    let h2 = log_h2.exp();
    if !(h2.is_finite() && h2 > 0.0) {
        return Err(OddError::numeric("SCV bandwidth is degenerate"));
    }
    Ok(s * h2)
}

/// Minimizer of a unimodal `f` on `[a, b]`
fn golden_section<F: Fn(f64) -> f64>(f: F, mut a: f64, mut b: f64) -> f64 {
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    for _ in 0..SCV_REFINE_ITER {
        if (b - a).abs() < 1e-10 {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}
