//! Two-phase matching of one image pair.
//!
//! A [`CandidateMatcher`] walks through the stages of [`MatcherState`] in
//! order: coarse global matching, fundamental-matrix estimation, one epipolar
//! line per source point, clustering of those lines, and finally matching of
//! every clustered point against the reference points found along its
//! cluster's chord. Each stage checks that the previous one has run, and
//! re-running a stage discards everything computed after it.

use crate::candidate_ranker::{ratio_test, BruteForceRanker, CandidateRanker, IndexedRanker};
use crate::config::{IndexKind, MatchConfig, MIN_FUNDAMENTAL_MATCHES};
use crate::descriptor_index::{BestBinFirstBuilder, IndexBuilder, NearestNeighborIndex};
use crate::error::MatchError;
use crate::fundamental::{FundamentalEstimator, RansacFundamentalEstimator};
use crate::geometry::{
    distance_from_line, epipolar_distance, epipolar_line, FundamentalMatrix, ImageRect, Line,
    LineFootprint,
};
use crate::image_features::ImageFeatures;
use crate::kd_tree_index::KdTreeBuilder;
use crate::line_clusterer::{ExactLineClusterer, LineCluster, LineClusterer, SortedLineClusterer};
use crate::spatial_grid::SpatialGrid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Progress of a [`CandidateMatcher`], in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatcherState {
    Configured,
    GloballyMatched,
    FundamentalEstimated,
    LinesComputed,
    Clustered,
    FinalMatched,
}

/// A source feature index paired with a reference feature index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Match {
    pub source: usize,
    pub reference: usize,
}

impl Match {
    pub fn new(source: usize, reference: usize) -> Self {
        Match { source, reference }
    }
}

/// Matches the features of a source image against a reference image.
///
/// Both images and the reference grid are borrowed, so one set of features
/// and one grid per image can serve every pair of a session.
pub struct CandidateMatcher<'a> {
    source: &'a ImageFeatures,
    reference: &'a ImageFeatures,
    reference_grid: &'a SpatialGrid,
    reference_rect: ImageRect,
    config: MatchConfig,
    rng: StdRng,
    state: MatcherState,
    matches: Vec<Match>,
    fundamental: Option<FundamentalMatrix>,
    epipolar_lines: Vec<Line>,
    clusters: Vec<LineCluster>,
}

impl<'a> CandidateMatcher<'a> {
    pub fn new(
        source: &'a ImageFeatures,
        reference: &'a ImageFeatures,
        reference_grid: &'a SpatialGrid,
        config: MatchConfig,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        CandidateMatcher {
            source,
            reference,
            reference_grid,
            reference_rect: reference.rect(),
            config,
            rng,
            state: MatcherState::Configured,
            matches: Vec::new(),
            fundamental: None,
            epipolar_lines: Vec::new(),
            clusters: Vec::new(),
        }
    }

    /// Reseeds the generator used for RANSAC and candidate padding.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> MatcherState {
        self.state
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Matches of the last completed matching stage.
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn into_matches(self) -> Vec<Match> {
        self.matches
    }

    pub fn fundamental(&self) -> Option<&FundamentalMatrix> {
        self.fundamental.as_ref()
    }

    /// One line per source point, in source order.
    pub fn epipolar_lines(&self) -> &[Line] {
        &self.epipolar_lines
    }

    pub fn clusters(&self) -> &[LineCluster] {
        &self.clusters
    }

    fn require(&self, operation: &'static str, required: MatcherState) -> Result<(), MatchError> {
        if self.state < required {
            return Err(MatchError::Precondition {
                operation,
                required,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Sets the state and drops every result of the later stages.
    fn enter(&mut self, state: MatcherState) {
        if state < MatcherState::FundamentalEstimated {
            self.fundamental = None;
        }
        if state < MatcherState::LinesComputed {
            self.epipolar_lines.clear();
        }
        if state < MatcherState::Clustered {
            self.clusters.clear();
        }
        self.state = state;
    }

    fn fundamental_or_err(&self, operation: &'static str) -> Result<FundamentalMatrix, MatchError> {
        self.fundamental.ok_or(MatchError::Precondition {
            operation,
            required: MatcherState::FundamentalEstimated,
            actual: self.state,
        })
    }

    /// Coarse matching between the strongest `top_percent` percent of the
    /// features of each image.
    ///
    /// A source feature is matched to its nearest reference feature when it
    /// passes the ratio test. With `two_way`, the reference feature's own
    /// nearest source feature must be the query and pass the ratio test too.
    /// Replaces any previous matches.
    pub fn global_match(
        &mut self,
        top_percent: usize,
        two_way: bool,
    ) -> Result<&[Match], MatchError> {
        match self.config.index {
            IndexKind::BestBinFirst => {
                self.global_match_with(&BestBinFirstBuilder, top_percent, two_way)
            }
            IndexKind::KdTree => self.global_match_with(&KdTreeBuilder, top_percent, two_way),
        }
    }

    /// [`global_match`](Self::global_match) with an explicit index type.
    pub fn global_match_with<B: IndexBuilder>(
        &mut self,
        builder: &B,
        top_percent: usize,
        two_way: bool,
    ) -> Result<&[Match], MatchError> {
        self.enter(MatcherState::Configured);
        self.matches.clear();

        let percent = top_percent.min(100);
        let source_count = self.source.len() * percent / 100;
        let reference_count = self.reference.len() * percent / 100;
        let effort = self.config.global_effort(source_count, reference_count);
        let ratio = self.config.global_ratio;

        let reference_index = builder.build(self.reference.descriptors().leading(reference_count));
        let source_index =
            two_way.then(|| builder.build(self.source.descriptors().leading(source_count)));

        for s in 0..source_count {
            let found = reference_index.top_k(self.source.descriptor(s), 2, effort);
            let [first, second] = found.as_slice() else {
                continue;
            };
            if !ratio_test(first.squared_distance, second.squared_distance, ratio) {
                continue;
            }
            if let Some(source_index) = &source_index {
                let back = source_index.top_k(self.reference.descriptor(first.index), 2, effort);
                let mutual = match back.as_slice() {
                    [b1, b2] => {
                        b1.index == s && ratio_test(b1.squared_distance, b2.squared_distance, ratio)
                    }
                    _ => false,
                };
                if !mutual {
                    continue;
                }
            }
            self.matches.push(Match::new(s, first.index));
        }

        log::debug!(
            "global_match: {} matches from {source_count} x {reference_count} features \
             (effort {effort}, two-way {two_way})",
            self.matches.len()
        );
        self.state = MatcherState::GloballyMatched;
        Ok(&self.matches)
    }

    /// Estimates the fundamental matrix from the current matches with RANSAC
    /// and keeps only the inlier matches.
    pub fn compute_fundamental(&mut self) -> Result<FundamentalMatrix, MatchError> {
        let estimator = RansacFundamentalEstimator::from_config(&self.config, self.rng.random());
        self.compute_fundamental_with(&estimator)
    }

    /// [`compute_fundamental`](Self::compute_fundamental) with an explicit estimator.
    ///
    /// # Errors
    /// [`MatchError::InsufficientMatches`] with fewer than eight matches and
    /// [`MatchError::InsufficientInliers`] when fewer than `min_inliers`
    /// matches survive. In the latter case the outliers are already removed.
    pub fn compute_fundamental_with(
        &mut self,
        estimator: &dyn FundamentalEstimator,
    ) -> Result<FundamentalMatrix, MatchError> {
        self.require("compute_fundamental", MatcherState::GloballyMatched)?;
        if self.matches.len() < MIN_FUNDAMENTAL_MATCHES {
            return Err(MatchError::InsufficientMatches {
                found: self.matches.len(),
                required: MIN_FUNDAMENTAL_MATCHES,
            });
        }
        self.enter(MatcherState::GloballyMatched);

        let (source, reference): (Vec<_>, Vec<_>) = self
            .matches
            .iter()
            .map(|m| (self.source.position(m.source), self.reference.position(m.reference)))
            .unzip();
        let estimate = estimator.estimate(&source, &reference)?;

        let mut inliers = estimate.inliers.iter();
        self.matches.retain(|_| inliers.next().copied().unwrap_or(false));
        log::debug!(
            "compute_fundamental: {} of {} matches kept",
            self.matches.len(),
            source.len()
        );
        if self.matches.len() < self.config.min_inliers {
            return Err(MatchError::InsufficientInliers {
                found: self.matches.len(),
                required: self.config.min_inliers,
            });
        }

        self.fundamental = Some(estimate.matrix);
        self.enter(MatcherState::FundamentalEstimated);
        Ok(estimate.matrix)
    }

    /// Uses a known fundamental matrix instead of estimating one.
    pub fn set_fundamental(&mut self, f: FundamentalMatrix) {
        self.fundamental = Some(f);
        self.enter(MatcherState::FundamentalEstimated);
    }

    /// Computes the epipolar line `F·x` in the reference image for every
    /// source point.
    pub fn compute_epipolar_lines(&mut self) -> Result<&[Line], MatchError> {
        self.require("compute_epipolar_lines", MatcherState::FundamentalEstimated)?;
        let f = self.fundamental_or_err("compute_epipolar_lines")?;
        self.epipolar_lines = self
            .source
            .keypoints()
            .iter()
            .map(|kp| epipolar_line(kp.position(), &f, false))
            .collect();
        self.enter(MatcherState::LinesComputed);
        Ok(&self.epipolar_lines)
    }

    /// Clusters the epipolar lines with [`ExactLineClusterer`].
    pub fn cluster_points(&mut self) -> Result<&[LineCluster], MatchError> {
        let clusterer = ExactLineClusterer {
            merge_distance: self.config.cluster_merge_distance,
        };
        self.cluster_with(&clusterer)
    }

    /// Clusters the epipolar lines with [`SortedLineClusterer`].
    pub fn cluster_points_fast(&mut self) -> Result<&[LineCluster], MatchError> {
        let clusterer = SortedLineClusterer {
            merge_distance: self.config.cluster_merge_distance,
        };
        self.cluster_with(&clusterer)
    }

    pub fn cluster_with(
        &mut self,
        clusterer: &dyn LineClusterer,
    ) -> Result<&[LineCluster], MatchError> {
        self.require("cluster_points", MatcherState::LinesComputed)?;
        self.clusters = clusterer.cluster(&self.epipolar_lines, &self.reference_rect);
        log::debug!(
            "cluster_points: {} lines in {} clusters",
            self.epipolar_lines.len(),
            self.clusters.len()
        );
        self.state = MatcherState::Clustered;
        Ok(&self.clusters)
    }

    /// Reference points that may match the members of cluster `cluster`.
    ///
    /// Samples the cluster's chord every `chord_sample_step` pixels and
    /// collects the grid points near the samples. A non-empty set smaller than
    /// `min_candidates` is padded with random distinct reference points; an
    /// empty set stays empty.
    pub fn probable_matches(&mut self, cluster: usize) -> Result<Vec<usize>, MatchError> {
        self.require("probable_matches", MatcherState::Clustered)?;
        let footprint = self
            .clusters
            .get(cluster)
            .map(|c| c.footprint)
            .ok_or(MatchError::ClusterOutOfRange {
                index: cluster,
                count: self.clusters.len(),
            })?;
        Ok(collect_candidates(
            self.reference_grid,
            &footprint,
            &self.config,
            self.reference.len(),
            &mut self.rng,
        ))
    }

    /// Final matching with an index over each candidate set.
    pub fn match_points(&mut self) -> Result<&[Match], MatchError> {
        let (min, divisor) = (self.config.local_effort_min, self.config.effort_divisor);
        match self.config.index {
            IndexKind::BestBinFirst => {
                self.match_with(&mut IndexedRanker::with_effort(BestBinFirstBuilder, min, divisor))
            }
            IndexKind::KdTree => {
                self.match_with(&mut IndexedRanker::with_effort(KdTreeBuilder, min, divisor))
            }
        }
    }

    /// Final matching by exhaustive comparison with each candidate set.
    pub fn bf_match(&mut self) -> Result<&[Match], MatchError> {
        self.match_with(&mut BruteForceRanker::new())
    }

    /// Final matching: for every cluster, ranks its candidates for each member
    /// and keeps the best candidate when it passes the ratio test and lies
    /// within `epipolar_threshold` of the member's position along the reverse
    /// epipolar line. Replaces the global matches.
    pub fn match_with(&mut self, ranker: &mut dyn CandidateRanker) -> Result<&[Match], MatchError> {
        self.require("match", MatcherState::Clustered)?;
        let f = self.fundamental_or_err("match")?;
        let ratio = self.config.local_ratio;
        let threshold = self.config.epipolar_threshold;

        let mut matches = Vec::new();
        let mut skipped = 0usize;
        for cluster in &self.clusters {
            let candidates = collect_candidates(
                self.reference_grid,
                &cluster.footprint,
                &self.config,
                self.reference.len(),
                &mut self.rng,
            );
            if candidates.is_empty() {
                skipped += 1;
                continue;
            }
            ranker.prepare(&candidates, self.reference.descriptors());

            for &s in &cluster.members {
                let Some([first, second]) = ranker.top2(self.source.descriptor(s)) else {
                    continue;
                };
                if !ratio_test(first.squared_distance, second.squared_distance, ratio) {
                    continue;
                }
                let back = epipolar_line(self.reference.position(first.index), &f, true);
                if distance_from_line(self.source.position(s), &back) < threshold {
                    matches.push(Match::new(s, first.index));
                }
            }
        }

        log::debug!(
            "match: {} matches from {} clusters ({skipped} without candidates)",
            matches.len(),
            self.clusters.len()
        );
        self.matches = matches;
        self.state = MatcherState::FinalMatched;
        Ok(&self.matches)
    }

    /// Drops matches whose reference point lies `epipolar_threshold` pixels
    /// or more from the source point's epipolar line. Returns how many were
    /// dropped.
    pub fn verify_epipolar_constraints(&mut self) -> Result<usize, MatchError> {
        let f = self.fundamental_or_err("verify_epipolar_constraints")?;
        let threshold = self.config.epipolar_threshold;
        let (source, reference) = (self.source, self.reference);
        let before = self.matches.len();
        self.matches.retain(|m| {
            epipolar_distance(source.position(m.source), reference.position(m.reference), &f)
                < threshold
        });
        Ok(before - self.matches.len())
    }
}

/// Grid points along `footprint`, padded with random reference indices.
///
/// Kept free of `self` so callers can borrow the clusters while drawing from
/// the matcher's generator.
fn collect_candidates(
    grid: &SpatialGrid,
    footprint: &LineFootprint,
    config: &MatchConfig,
    reference_count: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let step = config.chord_sample_step.max(f64::EPSILON);
    let samples = (footprint.length() / step).floor() as usize;
    let (start, end) = (footprint.start, footprint.end);
    let n = samples as f64;
    let points: Vec<(f64, f64)> = (0..samples)
        .map(|i| {
            let k1 = (i + 1) as f64;
            let k2 = n - k1;
            ((k1 * end.0 + k2 * start.0) / n, (k1 * end.1 + k2 * start.1) / n)
        })
        .collect();

    let mut candidates = grid.points_near_polyline(&points);
    let target = config.min_candidates.min(reference_count);
    if !candidates.is_empty() && candidates.len() < target {
        let mut seen: HashSet<usize> = candidates.iter().copied().collect();
        while candidates.len() < target {
            let r = rng.random_range(0..reference_count);
            if seen.insert(r) {
                candidates.push(r);
            }
        }
    }
    candidates
}
