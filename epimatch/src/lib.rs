//! # Epimatch Library
//!
//! The `epimatch` library matches sparse 128-byte local-feature descriptors
//! (SIFT and friends) between two images. It uses epipolar geometry to shrink
//! the search space: after a coarse match on the strongest features it
//! estimates the fundamental matrix, and then compares each source feature only
//! with the reference features lying near its epipolar line. The output is the
//! per-pair match list that a multi-view reconstruction pipeline consumes.
//!
//! ## Overview of Modules
//!
//! - **`candidate_matcher`**: The per-pair state machine that runs global
//!   matching, geometry estimation, epipolar clustering and final matching.
//!
//! - **`pipeline`**: Runs the matcher over one pair or, in parallel, over every
//!   pair of an image collection.
//!
//! - **`spatial_grid`**: Four half-cell-shifted tilings of the reference image
//!   used for cheap "points near here" queries.
//!
//! - **`line_clusterer`**: Groups source points whose epipolar lines cross the
//!   reference image along almost the same chord, exactly or by sorting packed
//!   endpoint keys.
//!
//! - **`geometry`**: Homogeneous lines, image rectangles, chords and epipolar
//!   lines.
//!
//! - **`descriptor_index`** and **`kd_tree_index`**: Nearest-neighbour search
//!   over descriptors, bounded-effort best-bin-first or exact.
//!
//! - **`candidate_ranker`**: Top-two search within a candidate set and the
//!   ratio test.
//!
//! - **`fundamental`** and **`ransac`**: Normalised eight-point estimation
//!   inside a generic RANSAC loop.
//!
//! - **`keypoint`**, **`descriptor_buffer`** and **`image_features`**: The
//!   per-image feature data.
//!
//! - **`match_record`**: Reading and writing of plain-text match files.
//!
//! - **`config`** and **`error`**: Tuning constants and the error type.

pub mod candidate_matcher;
pub mod candidate_ranker;
pub mod config;
pub mod descriptor_buffer;
pub mod descriptor_index;
pub mod error;
pub mod fundamental;
pub mod geometry;
pub mod image_features;
pub mod kd_tree_index;
pub mod keypoint;
pub mod line_clusterer;
pub mod match_record;
pub mod pipeline;
pub mod ransac;
pub mod spatial_grid;

pub use candidate_matcher::{CandidateMatcher, Match, MatcherState};
pub use config::MatchConfig;
pub use error::MatchError;
pub use image_features::ImageFeatures;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
