//! A small model-agnostic RANSAC loop.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. Failure to reach a
//! consensus is reported through [`RansacResult::model`] being `None`, never by
//! panicking.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Upper bound on the number of hypotheses.
    pub max_iters: usize,
    /// A datum is an inlier when its residual is at most this.
    pub thresh: f64,
    /// Hypotheses with fewer inliers are discarded.
    pub min_inliers: usize,
    /// Probability of drawing at least one all-inlier sample, in `[0, 1)`.
    pub confidence: f64,
    pub seed: u64,
    /// Refit each accepted hypothesis on its inliers and re-score it.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            thresh: 1.0,
            min_inliers: 8,
            confidence: 0.99,
            seed: 0,
            refit_on_inliers: true,
        }
    }
}

/// Best hypothesis found by [`ransac`].
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    /// `None` when no hypothesis reached `min_inliers`.
    pub model: Option<M>,
    /// Indices of the data supporting `model`, ascending.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers.
    pub inlier_rms: f64,
    /// Hypotheses drawn.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Fits a model to the data at `indices`, `None` when the sample is
    /// degenerate.
    fn fit(data: &[Self::Datum], indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum, in the units of `thresh`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Least-squares fit on a full inlier set. Defaults to [`fit`](Self::fit).
    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        Self::fit(data, inliers)
    }
}

/// Number of draws needed to see one clean sample with probability
/// `confidence`, given the current inlier ratio.
fn required_iterations(
    confidence: f64,
    inlier_ratio: f64,
    sample_size: usize,
    max_iters: usize,
) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    if !(0.0..1.0).contains(&confidence) || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let clean = inlier_ratio.powi(sample_size as i32);
    let denom = (1.0 - clean).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil();
    if n.is_finite() && n < max_iters as f64 {
        n.max(1.0) as usize
    } else {
        max_iters
    }
}

/// Inliers of `model` and their RMS residual.
fn score<E: Estimator>(model: &E::Model, data: &[E::Datum], thresh: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum_sq = 0.0;
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            sum_sq += r * r;
        }
    }
    let rms = if inliers.is_empty() {
        f64::INFINITY
    } else {
        (sum_sq / inliers.len() as f64).sqrt()
    };
    (inliers, rms)
}

/// Runs RANSAC over `data`.
///
/// Hypotheses are ranked by inlier count, then by inlier RMS. The iteration
/// budget shrinks as better hypotheses are found.
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut budget = opts.max_iters;
    let mut iters = 0;

    while iters < budget {
        iters += 1;
        let sample = index::sample(&mut rng, data.len(), E::MIN_SAMPLES).into_vec();
        let Some(mut model) = E::fit(data, &sample) else {
            continue;
        };

        let (mut inliers, mut rms) = score::<E>(&model, data, opts.thresh);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        if opts.refit_on_inliers {
            if let Some(refit) = E::refit(data, &inliers) {
                let (refit_inliers, refit_rms) = score::<E>(&refit, data, opts.thresh);
                if refit_inliers.len() >= inliers.len() {
                    model = refit;
                    inliers = refit_inliers;
                    rms = refit_rms;
                }
            }
        }

        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && rms < best.inlier_rms);
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            budget = required_iterations(opts.confidence, ratio, E::MIN_SAMPLES, opts.max_iters)
                .max(iters);
            best.model = Some(model);
            best.inliers = inliers;
            best.inlier_rms = rms;
        }
    }

    best.iters = iters;
    best
}
