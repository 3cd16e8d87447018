use crate::candidate_matcher::MatcherState;
use thiserror::Error;

/// Errors produced while loading features or matching one image pair.
///
/// Every variant aborts the current pair only; the graph driver records the
/// failure and moves on to the next pair.
#[derive(Debug, Error)]
pub enum MatchError {
    /// An operation was called before the stage it depends on.
    #[error("{operation} requires the matcher to be at least {required:?}, but it is {actual:?}")]
    Precondition {
        operation: &'static str,
        required: MatcherState,
        actual: MatcherState,
    },
    /// Too few putative matches to estimate a fundamental matrix.
    #[error("need at least {required} matches to estimate geometry, got {found}")]
    InsufficientMatches { found: usize, required: usize },
    /// The estimated geometry is supported by too few matches.
    #[error("only {found} inliers support the fundamental matrix, need {required}")]
    InsufficientInliers { found: usize, required: usize },
    /// Coarse matching found too few matches to go on with the pair.
    #[error("global matching found {found} matches, need {required}")]
    TooFewGlobalMatches { found: usize, required: usize },
    /// The pair produced too few final matches to be worth reporting.
    #[error("final matching found {found} matches, need {required}")]
    TooFewFinalMatches { found: usize, required: usize },
    /// The robust estimator found no consensus model.
    #[error("fundamental matrix estimation failed: {0}")]
    EstimationFailed(String),
    /// A raw descriptor buffer is not a whole number of descriptors.
    #[error("descriptor buffer of {0} bytes is not a multiple of 128")]
    DescriptorLength(usize),
    #[error("{keypoints} keypoints but {descriptors} descriptors")]
    FeatureCountMismatch { keypoints: usize, descriptors: usize },
    #[error("{images} images but {grids} spatial grids")]
    GridCountMismatch { images: usize, grids: usize },
    #[error("cluster {index} out of range ({count} clusters)")]
    ClusterOutOfRange { index: usize, count: usize },
    /// A match file line could not be parsed.
    #[error("malformed match record at line {line}: {message}")]
    MalformedRecord { line: usize, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
