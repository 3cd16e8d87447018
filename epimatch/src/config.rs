use crate::error::MatchError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_GRID_CELL_SIZE: usize = 16;
pub const DEFAULT_TOP_PERCENT: usize = 20;
pub const DEFAULT_GLOBAL_RATIO: f64 = 0.6;
pub const DEFAULT_LOCAL_RATIO: f64 = 0.6;
pub const DEFAULT_CLUSTER_MERGE_DISTANCE: i32 = 4;
pub const DEFAULT_EPIPOLAR_THRESHOLD: f64 = 4.0;
pub const DEFAULT_MIN_CANDIDATES: usize = 50;
pub const DEFAULT_CHORD_SAMPLE_STEP: f64 = 4.0;
pub const DEFAULT_MIN_GLOBAL_MATCHES: usize = 16;
pub const DEFAULT_MIN_INLIERS: usize = 27;
pub const DEFAULT_MIN_PAIR_MATCHES: usize = 16;
pub const DEFAULT_GLOBAL_EFFORT_MIN: usize = 50;
pub const DEFAULT_GLOBAL_EFFORT_MAX: usize = 500;
pub const DEFAULT_LOCAL_EFFORT_MIN: usize = 20;
pub const DEFAULT_EFFORT_DIVISOR: usize = 20;
pub const DEFAULT_RANSAC_THRESHOLD: f64 = 1.0;
pub const DEFAULT_RANSAC_CONFIDENCE: f64 = 0.99;
pub const DEFAULT_RANSAC_MAX_ITERS: usize = 2000;

/// Minimum number of correspondences for the eight-point solver.
pub const MIN_FUNDAMENTAL_MATCHES: usize = 8;

/// How source points are grouped by epipolar footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringStrategy {
    /// Sort by packed endpoint key and merge neighbours in sorted order.
    #[default]
    Fast,
    /// Compare every line against every existing cluster.
    Exact,
}

/// How the two nearest candidates of a query are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Build a search index over each candidate set.
    #[default]
    Indexed,
    /// Compare against every candidate.
    BruteForce,
}

/// Which nearest-neighbour index backs the indexed searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Priority search with a bounded number of visited points.
    #[default]
    BestBinFirst,
    /// Exact search; the effort budget is ignored.
    KdTree,
}

/// Every tuned constant of the matching pipeline.
///
/// Missing fields in a JSON file take their defaults, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Side of a spatial grid cell in pixels (rounded up to even).
    pub grid_cell_size: usize,
    /// Percentage of each image's strongest features used for global matching.
    pub top_percent: usize,
    /// Require global matches to be mutual best matches.
    pub two_way_global: bool,
    pub global_ratio: f64,
    pub local_ratio: f64,
    /// Per-endpoint L1 distance below which two footprints are merged.
    pub cluster_merge_distance: i32,
    /// Maximum distance in pixels from the reverse epipolar line.
    pub epipolar_threshold: f64,
    /// Candidate sets smaller than this are padded with random points.
    pub min_candidates: usize,
    /// Pixels of chord length per grid sample.
    pub chord_sample_step: f64,
    pub min_global_matches: usize,
    pub min_inliers: usize,
    /// Pairs with fewer final matches are dropped by the graph driver.
    pub min_pair_matches: usize,
    pub global_effort_min: usize,
    pub global_effort_max: usize,
    pub local_effort_min: usize,
    /// Search effort is the searched set size divided by this.
    pub effort_divisor: usize,
    pub clustering: ClusteringStrategy,
    pub ranking: RankingStrategy,
    pub index: IndexKind,
    /// RANSAC inlier threshold in pixels.
    pub ransac_threshold: f64,
    pub ransac_confidence: f64,
    pub ransac_max_iters: usize,
    /// Base seed for every random choice of a run.
    pub seed: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            grid_cell_size: DEFAULT_GRID_CELL_SIZE,
            top_percent: DEFAULT_TOP_PERCENT,
            two_way_global: false,
            global_ratio: DEFAULT_GLOBAL_RATIO,
            local_ratio: DEFAULT_LOCAL_RATIO,
            cluster_merge_distance: DEFAULT_CLUSTER_MERGE_DISTANCE,
            epipolar_threshold: DEFAULT_EPIPOLAR_THRESHOLD,
            min_candidates: DEFAULT_MIN_CANDIDATES,
            chord_sample_step: DEFAULT_CHORD_SAMPLE_STEP,
            min_global_matches: DEFAULT_MIN_GLOBAL_MATCHES,
            min_inliers: DEFAULT_MIN_INLIERS,
            min_pair_matches: DEFAULT_MIN_PAIR_MATCHES,
            global_effort_min: DEFAULT_GLOBAL_EFFORT_MIN,
            global_effort_max: DEFAULT_GLOBAL_EFFORT_MAX,
            local_effort_min: DEFAULT_LOCAL_EFFORT_MIN,
            effort_divisor: DEFAULT_EFFORT_DIVISOR,
            clustering: ClusteringStrategy::default(),
            ranking: RankingStrategy::default(),
            index: IndexKind::default(),
            ransac_threshold: DEFAULT_RANSAC_THRESHOLD,
            ransac_confidence: DEFAULT_RANSAC_CONFIDENCE,
            ransac_max_iters: DEFAULT_RANSAC_MAX_ITERS,
            seed: 0,
        }
    }
}

impl MatchConfig {
    /// Reads a JSON config file. Absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, MatchError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Search effort for global matching over sets of the given sizes.
    pub fn global_effort(&self, source_count: usize, reference_count: usize) -> usize {
        let divisor = self.effort_divisor.max(1);
        source_count
            .max(reference_count)
            .div_ceil(divisor)
            .clamp(self.global_effort_min, self.global_effort_max.max(self.global_effort_min))
    }

    /// Search effort for one local candidate set.
    pub fn local_effort(&self, candidate_count: usize) -> usize {
        (candidate_count / self.effort_divisor.max(1)).max(self.local_effort_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: MatchConfig =
            serde_json::from_str(r#"{ "top_percent": 50, "clustering": "exact" }"#).unwrap();
        assert_eq!(config.top_percent, 50);
        assert_eq!(config.clustering, ClusteringStrategy::Exact);
        assert_eq!(config.min_inliers, DEFAULT_MIN_INLIERS);
        assert_eq!(config.ranking, RankingStrategy::Indexed);
    }

    #[test]
    fn global_effort_is_clamped() {
        let config = MatchConfig::default();
        assert_eq!(config.global_effort(100, 10), 50);
        assert_eq!(config.global_effort(2001, 10), 101);
        assert_eq!(config.global_effort(100_000, 10), 500);
    }

    #[test]
    fn local_effort_has_a_floor() {
        let config = MatchConfig::default();
        assert_eq!(config.local_effort(50), 20);
        assert_eq!(config.local_effort(1000), 50);
    }

    #[test]
    fn unknown_json_is_a_config_error() {
        let dir = std::env::temp_dir().join("epimatch_config_test.json");
        fs::write(&dir, "{ not json").unwrap();
        let err = MatchConfig::from_json_file(&dir).unwrap_err();
        assert!(matches!(err, MatchError::Config(_)));
        let _ = fs::remove_file(&dir);
    }
}
