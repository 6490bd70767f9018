//! PCA-like Projection Model
//!
//! Standardizes features and rotates them onto the top-k principal
//! directions. Two fitting modes:
//! - Classical: mean/std standardization, sample covariance
//! - Robust: median/MAD standardization, Huber-reweighted covariance, so a
//!   few contaminated training series cannot tilt the coordinate frame
//!
//! Once fitted, the transform is frozen. Window data is only ever passed
//! through `project`, never used to re-estimate parameters.

use crate::algo::stats::{mad, mean, median, std_dev};
use crate::error::{OddError, Result};
use crate::features::FeatureMatrix;
use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

/// Spreads below this are treated as a constant column
const MIN_SCALE: f64 = 1e-12;
/// Huber reweighting iterations (robust mode)
const MAX_REWEIGHT_ITER: usize = 50;
const REWEIGHT_TOL: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionModel {
    /// Per-feature location (D)
    pub center: DVector<f64>,
    /// Per-feature spread (D)
    pub scale: DVector<f64>,
    /// Principal directions as columns (D × k)
    pub rotation: DMatrix<f64>,
    /// Training rows in projected coordinates (m × k)
    pub reference_coords: DMatrix<f64>,
    /// Share of total variance captured by each kept direction
    pub explained_variance: Vec<f64>,
    pub robust: bool,
}

/// Coordinates of the usable series of a feature matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    /// Series index of each coordinate row
    pub series: Vec<usize>,
    pub coords: DMatrix<f64>,
}

impl Projected {
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Coordinate rows at the given positions
    pub fn rows(&self, positions: &[usize]) -> DMatrix<f64> {
        self.coords.select_rows(positions)
    }
}

impl ProjectionModel {
    /// Fit on the usable rows of a training feature matrix
    pub fn fit(features: &FeatureMatrix, robust: bool, k: usize) -> Result<Self> {
        let d = features.dim();
        let included = features.included();
        let m = included.len();

        if m == 0 {
            return Err(OddError::AllSeriesExcluded(features.num_series()));
        }
        if k > d {
            return Err(OddError::InvalidConfig(format!(
                "k = {} exceeds the feature dimension {}",
                k, d
            )));
        }
        if m <= d {
            return Err(OddError::TrainingTooSmall {
                usable: m,
                features: d,
            });
        }

        let x = features.to_matrix(&included);
        let (center, scale) = location_scale(&x, robust);
        if let Some(j) = scale.iter().position(|s| !(s.is_finite() && *s > MIN_SCALE)) {
            return Err(OddError::numeric(format!(
                "feature '{}' has no spread in the training data",
                features.names()[j]
            )));
        }

        let z = standardize(&x, &center, &scale);
        let cov = if robust {
            reweighted_covariance(&z)?
        } else {
            (z.transpose() * &z) / (m as f64 - 1.0)
        };
        if cov.iter().any(|v| !v.is_finite()) || Cholesky::new(cov.clone()).is_none() {
            return Err(OddError::numeric("feature covariance matrix is singular"));
        }

        let (rotation, explained_variance) = principal_directions(cov, k);
        debug!(
            series = m,
            features = d,
            k,
            robust,
            explained = ?explained_variance,
            "Projection fitted."
        );

        let mut model = Self {
            center,
            scale,
            rotation,
            reference_coords: DMatrix::zeros(0, k),
            explained_variance,
            robust,
        };
        model.reference_coords = model.transform(&x);
        Ok(model)
    }

    /// Project the usable rows of `features` with the frozen transform
    pub fn project(&self, features: &FeatureMatrix) -> Result<Projected> {
        if features.dim() != self.dim() {
            return Err(OddError::InvalidInput(format!(
                "expected {} features, got {}",
                self.dim(),
                features.dim()
            )));
        }
        let series = features.included();
        let coords = self.transform(&features.to_matrix(&series));
        Ok(Projected { series, coords })
    }

    /// `(x - center) / scale · rotation` for a dense m × D matrix
    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        standardize(x, &self.center, &self.scale) * &self.rotation
    }

    /// Feature dimension (D)
    pub fn dim(&self) -> usize {
        self.center.len()
    }

    /// Projected dimension (k)
    pub fn k(&self) -> usize {
        self.rotation.ncols()
    }

    /// Number of reference rows (m)
    pub fn reference_len(&self) -> usize {
        self.reference_coords.nrows()
    }
}

fn location_scale(x: &DMatrix<f64>, robust: bool) -> (DVector<f64>, DVector<f64>) {
    let d = x.ncols();
    let mut center = DVector::zeros(d);
    let mut scale = DVector::zeros(d);
    for j in 0..d {
        let col: Vec<f64> = x.column(j).iter().copied().collect();
        if robust {
            center[j] = median(&col);
            scale[j] = mad(&col);
        } else {
            center[j] = mean(&col);
            scale[j] = std_dev(&col);
        }
    }
    (center, scale)
}

fn standardize(x: &DMatrix<f64>, center: &DVector<f64>, scale: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| (x[(i, j)] - center[j]) / scale[j])
}

/// Top-k eigenvectors (descending eigenvalue) with a fixed sign convention:
/// the largest-magnitude loading of every direction is positive
fn principal_directions(cov: DMatrix<f64>, k: usize) -> (DMatrix<f64>, Vec<f64>) {
    let d = cov.nrows();
    let trace = cov.trace();
    let eigen = SymmetricEigen::new(cov);

    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .total_cmp(&eigen.eigenvalues[a])
            .then(a.cmp(&b))
    });

    let mut rotation = DMatrix::zeros(d, k);
    let mut explained = Vec::with_capacity(k);
    for (c, &idx) in order.iter().take(k).enumerate() {
        let mut v = eigen.eigenvectors.column(idx).into_owned();
        let pivot = v.iamax();
        if v[pivot] < 0.0 {
            v.neg_mut();
        }
        rotation.set_column(c, &v);
        explained.push(eigen.eigenvalues[idx] / trace);
    }
    (rotation, explained)
}

/// Huber-type M-estimate of scatter: rows whose Mahalanobis distance exceeds
/// the 0.975 chi-square cutoff are down-weighted by `cutoff / distance`
fn reweighted_covariance(z: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (m, d) = z.shape();
    let cutoff = ChiSquared::new(d as f64)
        .map_err(|e| OddError::numeric(format!("chi-square cutoff: {}", e)))?
        .inverse_cdf(0.975)
        .sqrt();

    let mut weights = vec![1.0; m];
    let mut location = weighted_mean(z, &weights);
    let mut cov = weighted_scatter(z, &weights, &location);

    for _ in 0..MAX_REWEIGHT_ITER {
        let chol = Cholesky::new(cov.clone())
            .ok_or_else(|| OddError::numeric("robust covariance matrix is singular"))?;

        for (i, w) in weights.iter_mut().enumerate() {
            let r = z.row(i).transpose() - &location;
            let dist = r.dot(&chol.solve(&r)).max(0.0).sqrt();
            *w = if dist <= cutoff { 1.0 } else { cutoff / dist };
        }

        location = weighted_mean(z, &weights);
        let next = weighted_scatter(z, &weights, &location);
        let change = (&next - &cov).amax();
        cov = next;
        if change < REWEIGHT_TOL {
            break;
        }
    }
    Ok(cov)
}

fn weighted_mean(z: &DMatrix<f64>, weights: &[f64]) -> DVector<f64> {
    let total: f64 = weights.iter().sum();
    let mut mu = DVector::zeros(z.ncols());
    for (i, w) in weights.iter().enumerate() {
        mu += z.row(i).transpose() * *w;
    }
    mu / total
}

fn weighted_scatter(z: &DMatrix<f64>, weights: &[f64], location: &DVector<f64>) -> DMatrix<f64> {
    let d = z.ncols();
    let mut scatter = DMatrix::zeros(d, d);
    let mut total = 0.0;
    for (i, w) in weights.iter().enumerate() {
        let r = z.row(i).transpose() - location;
        let w2 = w * w;
        scatter += (&r * r.transpose()) * w2;
        total += w2;
    }
    scatter / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    /// Correlated 3-feature rows: f1 ≈ 2·f0, f2 independent
    fn correlated(n: usize, seed: u64) -> FeatureMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let rows = (0..n)
            .map(|_| {
                let a: f64 = normal.sample(&mut rng);
                let noise: f64 = normal.sample(&mut rng);
                let b: f64 = normal.sample(&mut rng);
                Some(vec![a, 2.0 * a + 0.1 * noise, b])
            })
            .collect();
        FeatureMatrix::from_rows(vec!["a".into(), "b".into(), "c".into()], rows).unwrap()
    }

    #[test]
    fn test_first_direction_follows_correlation() {
        let fm = correlated(200, 1);
        let model = ProjectionModel::fit(&fm, false, 2).unwrap();

        assert_eq!(model.rotation.shape(), (3, 2));
        assert_eq!(model.reference_coords.shape(), (200, 2));
        let pc1 = model.rotation.column(0);
        assert!(pc1[0] > 0.6 && pc1[1] > 0.6, "pc1 = {:?}", pc1);
        assert!(pc1[2].abs() < 0.2);
        assert!(model.explained_variance[0] > model.explained_variance[1]);
    }

    #[test]
    fn test_projection_round_trip() {
        let fm = correlated(120, 2);
        for robust in [false, true] {
            let model = ProjectionModel::fit(&fm, robust, 2).unwrap();
            let projected = model.project(&fm).unwrap();
            assert_eq!(projected.series, (0..120).collect::<Vec<_>>());
            assert_eq!(projected.coords, model.reference_coords);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let fm = correlated(80, 3);
        let a = ProjectionModel::fit(&fm, false, 2).unwrap();
        let b = ProjectionModel::fit(&fm, false, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_robust_resists_contamination() {
        let clean = correlated(200, 4);
        let mut rows: Vec<Option<Vec<f64>>> =
            (0..200).map(|i| Some(clean.row(i).to_vec())).collect();
        // A handful of wild rows along the independent feature
        for row in rows.iter_mut().take(6) {
            *row = Some(vec![0.0, 0.0, 60.0]);
        }
        let dirty = FeatureMatrix::from_rows(clean.names().to_vec(), rows).unwrap();

        let robust = ProjectionModel::fit(&dirty, true, 2).unwrap();
        let pc1 = robust.rotation.column(0);
        assert!(pc1[2].abs() < 0.3, "robust pc1 tilted: {:?}", pc1);
        assert!(robust.reference_coords.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_constant_feature_is_unstable() {
        let rows = (0..30)
            .map(|i| Some(vec![i as f64, 5.0, (i * i) as f64]))
            .collect();
        let fm = FeatureMatrix::from_rows(vec!["a".into(), "b".into(), "c".into()], rows).unwrap();
        for robust in [false, true] {
            match ProjectionModel::fit(&fm, robust, 2) {
                Err(OddError::NumericInstability(msg)) => assert!(msg.contains("'b'")),
                other => panic!("expected numeric instability, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_too_few_rows() {
        let fm = correlated(3, 5);
        assert!(matches!(
            ProjectionModel::fit(&fm, false, 2),
            Err(OddError::TrainingTooSmall {
                usable: 3,
                features: 3
            })
        ));

        let empty = FeatureMatrix::from_rows(vec!["a".into()], vec![None, None]).unwrap();
        assert!(matches!(
            ProjectionModel::fit(&empty, false, 1),
            Err(OddError::AllSeriesExcluded(2))
        ));
    }
}
