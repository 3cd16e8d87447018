//! Robust fundamental-matrix estimation from putative point matches.

use crate::config::{MatchConfig, MIN_FUNDAMENTAL_MATCHES};
use crate::error::MatchError;
use crate::geometry::FundamentalMatrix;
use crate::ransac::{ransac, Estimator, RansacOptions};
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Output of a robust estimate: the matrix and, per input correspondence,
/// whether it supports the matrix.
#[derive(Debug, Clone)]
pub struct FundamentalEstimate {
    pub matrix: FundamentalMatrix,
    pub inliers: Vec<bool>,
}

impl FundamentalEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }
}

/// Estimates `F` with `x_refᵀ F x_src = 0` from matched pixel positions.
pub trait FundamentalEstimator {
    /// # Errors
    /// [`MatchError::InsufficientMatches`] with fewer than eight pairs, and
    /// [`MatchError::EstimationFailed`] when no consensus is found.
    fn estimate(
        &self,
        source: &[(f64, f64)],
        reference: &[(f64, f64)],
    ) -> Result<FundamentalEstimate, MatchError>;
}

/// Similarity transform moving `points` to zero mean and mean distance
/// `sqrt(2)` from the origin.
fn normalizing_transform<'a>(
    points: impl Iterator<Item = &'a (f64, f64)> + Clone,
) -> Option<Matrix3<f64>> {
    let n = points.clone().count() as f64;
    if n == 0.0 {
        return None;
    }
    let (sx, sy) = points
        .clone()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.0, sy + p.1));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = points
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    #[rustfmt::skip]
    let t = Matrix3::new(
        s, 0.0, -s * cx,
        0.0, s, -s * cy,
        0.0, 0.0, 1.0,
    );
    Some(t)
}

fn transform(t: &Matrix3<f64>, p: &(f64, f64)) -> (f64, f64) {
    let v = t * Vector3::new(p.0, p.1, 1.0);
    (v.x / v.z, v.y / v.z)
}

/// Normalised eight-point algorithm over all given pairs, with the rank-2
/// constraint enforced. The result is not scaled.
///
/// Returns `None` for fewer than eight pairs or degenerate configurations.
pub fn eight_point(source: &[(f64, f64)], reference: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = source.len();
    if n < MIN_FUNDAMENTAL_MATCHES || reference.len() != n {
        return None;
    }
    let t1 = normalizing_transform(source.iter())?;
    let t2 = normalizing_transform(reference.iter())?;

    // The SVD needs at least as many rows as columns.
    let mut a = DMatrix::<f64>::zeros(n.max(9), 9);
    for (i, (p, q)) in source.iter().zip(reference).enumerate() {
        let (x, y) = transform(&t1, p);
        let (xp, yp) = transform(&t2, q);
        let row = [xp * x, xp * y, xp, yp * x, yp * y, yp, x, y, 1.0];
        for (j, v) in row.into_iter().enumerate() {
            a[(i, j)] = v;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let null = svd.singular_values.imin();
    let f = Matrix3::from_row_iterator(v_t.row(null).iter().copied());

    let svd_f = f.svd(true, true);
    let (u, v_t) = (svd_f.u?, svd_f.v_t?);
    let mut s = svd_f.singular_values;
    let smallest = s.imin();
    s[smallest] = 0.0;
    let f = u * Matrix3::from_diagonal(&s) * v_t;

    let f = t2.transpose() * f * t1;
    f.iter().all(|v| v.is_finite()).then_some(f)
}

/// One putative match.
#[derive(Debug, Clone, Copy)]
struct Correspondence {
    source: (f64, f64),
    reference: (f64, f64),
}

fn line_distance(l: &Vector3<f64>, p: (f64, f64)) -> f64 {
    let norm = (l.x * l.x + l.y * l.y).sqrt();
    if norm <= f64::EPSILON {
        return f64::INFINITY;
    }
    (l.x * p.0 + l.y * p.1 + l.z).abs() / norm
}

struct EightPoint;

impl Estimator for EightPoint {
    type Datum = Correspondence;
    type Model = Matrix3<f64>;

    const MIN_SAMPLES: usize = MIN_FUNDAMENTAL_MATCHES;

    fn fit(data: &[Correspondence], indices: &[usize]) -> Option<Matrix3<f64>> {
        let (source, reference): (Vec<_>, Vec<_>) = indices
            .iter()
            .map(|&i| (data[i].source, data[i].reference))
            .unzip();
        eight_point(&source, &reference)
    }

    /// The larger of the two point-to-epipolar-line distances.
    fn residual(f: &Matrix3<f64>, datum: &Correspondence) -> f64 {
        let x = Vector3::new(datum.source.0, datum.source.1, 1.0);
        let xp = Vector3::new(datum.reference.0, datum.reference.1, 1.0);
        let forward = line_distance(&(f * x), datum.reference);
        let backward = line_distance(&(f.transpose() * xp), datum.source);
        forward.max(backward)
    }
}

/// Eight-point solver inside RANSAC, refitting every promising hypothesis on
/// its inliers.
#[derive(Debug, Clone)]
pub struct RansacFundamentalEstimator {
    pub options: RansacOptions,
}

impl RansacFundamentalEstimator {
    pub fn new(threshold: f64, confidence: f64, max_iters: usize, seed: u64) -> Self {
        RansacFundamentalEstimator {
            options: RansacOptions {
                max_iters,
                thresh: threshold,
                min_inliers: MIN_FUNDAMENTAL_MATCHES,
                confidence,
                seed,
                refit_on_inliers: true,
            },
        }
    }

    pub fn from_config(config: &MatchConfig, seed: u64) -> Self {
        Self::new(
            config.ransac_threshold,
            config.ransac_confidence,
            config.ransac_max_iters,
            seed,
        )
    }
}

impl FundamentalEstimator for RansacFundamentalEstimator {
    fn estimate(
        &self,
        source: &[(f64, f64)],
        reference: &[(f64, f64)],
    ) -> Result<FundamentalEstimate, MatchError> {
        let found = source.len().min(reference.len());
        if found < MIN_FUNDAMENTAL_MATCHES {
            return Err(MatchError::InsufficientMatches {
                found,
                required: MIN_FUNDAMENTAL_MATCHES,
            });
        }
        let data: Vec<Correspondence> = source
            .iter()
            .zip(reference)
            .map(|(&source, &reference)| Correspondence { source, reference })
            .collect();

        let result = ransac::<EightPoint>(&data, &self.options);
        let model = result.model.ok_or_else(|| {
            MatchError::EstimationFailed(format!(
                "no consensus among {} matches after {} iterations",
                data.len(),
                result.iters
            ))
        })?;
        let matrix = FundamentalMatrix::from_matrix(model).ok_or_else(|| {
            MatchError::EstimationFailed("estimated matrix has a zero last element".to_string())
        })?;

        let mut inliers = vec![false; data.len()];
        for &i in &result.inliers {
            inliers[i] = true;
        }
        log::debug!(
            "fundamental: {} of {} matches are inliers after {} iterations (rms {:.3})",
            result.inliers.len(),
            data.len(),
            result.iters,
            result.inlier_rms
        );
        Ok(FundamentalEstimate { matrix, inliers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::epipolar_distance;
    use nalgebra::{Point3, Rotation3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Projections of random 3D points into two cameras one step apart.
    fn two_view(n: usize, seed: u64) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
        let rotation = Rotation3::from_euler_angles(0.02, -0.08, 0.01);
        let translation = Vector3::new(0.6, 0.05, 0.1);
        let project = |p: Vector3<f64>| {
            let x = k * p;
            (x.x / x.z, x.y / x.z)
        };
        (0..n)
            .map(|_| {
                let p = Point3::new(
                    rng.random_range(-2.0..2.0),
                    rng.random_range(-1.5..1.5),
                    rng.random_range(4.0..9.0),
                );
                let second = rotation * p.coords + translation;
                (project(p.coords), project(second))
            })
            .unzip()
    }

    #[test]
    fn eight_point_fits_exact_data() {
        let (src, dst) = two_view(30, 1);
        let f = FundamentalMatrix::from_matrix(eight_point(&src, &dst).unwrap()).unwrap();
        for (p, q) in src.iter().zip(&dst) {
            assert!(epipolar_distance(*p, *q, &f) < 1e-6);
        }
        let m = f.matrix();
        assert!(m.determinant().abs() / m.norm().powi(3) < 1e-9);
    }

    #[test]
    fn too_few_matches_are_rejected() {
        let (src, dst) = two_view(7, 2);
        let err = RansacFundamentalEstimator::new(1.0, 0.99, 100, 0)
            .estimate(&src, &dst)
            .unwrap_err();
        assert!(matches!(
            err,
            MatchError::InsufficientMatches {
                found: 7,
                required: 8
            }
        ));
    }

    #[test]
    fn ransac_separates_outliers() {
        let (mut src, mut dst) = two_view(60, 3);
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..15 {
            src.push((rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)));
            dst.push((rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)));
        }
        let estimate = RansacFundamentalEstimator::new(1.0, 0.99, 2000, 9)
            .estimate(&src, &dst)
            .unwrap();
        assert!(estimate.inliers[..60].iter().all(|&inlier| inlier));
        assert!(estimate.inlier_count() < 66);
        assert_eq!(estimate.matrix.matrix()[(2, 2)], 1.0);
    }

    #[test]
    fn residual_is_the_larger_line_distance() {
        // Maps a source row `y` to the reference row `2y`.
        let f = Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 2.0, 0.0);
        let datum = Correspondence {
            source: (10.0, 20.0),
            reference: (13.0, 21.0),
        };
        // Forward: row 21 against row 40. Backward: row 20 against row 10.5.
        assert!((EightPoint::residual(&f, &datum) - 19.0).abs() < 1e-12);
        // The inverse map `y -> y / 2`: forward row 21 against row 10,
        // backward row 20 against row 42.
        let f = Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, -2.0, 0.0, 1.0, 0.0);
        assert!((EightPoint::residual(&f, &datum) - 22.0).abs() < 1e-12);
    }
}
