//! Drivers that run the full matcher over one image pair or over every pair
//! of an image collection.

use crate::candidate_matcher::{CandidateMatcher, Match};
use crate::config::{ClusteringStrategy, MatchConfig, RankingStrategy};
use crate::error::MatchError;
use crate::geometry::FundamentalMatrix;
use crate::image_features::ImageFeatures;
use crate::spatial_grid::SpatialGrid;
use rayon::prelude::*;

/// Result of matching one pair.
#[derive(Debug, Clone)]
pub struct PairMatches {
    /// Final matches, ascending by source then reference index.
    pub matches: Vec<Match>,
    pub fundamental: FundamentalMatrix,
    /// Number of coarse matches the geometry was estimated from.
    pub global_matches: usize,
}

/// Outcome of one pair of [`match_image_graph`]. The source image always has
/// the lower index.
#[derive(Debug)]
pub struct PairOutcome {
    pub source_image: usize,
    pub reference_image: usize,
    pub result: Result<PairMatches, MatchError>,
}

/// Runs every matching stage on one pair.
///
/// # Errors
/// [`MatchError::TooFewGlobalMatches`] when coarse matching finds fewer than
/// `min_global_matches` matches, plus any error of the individual stages.
pub fn match_image_pair(
    source: &ImageFeatures,
    reference: &ImageFeatures,
    reference_grid: &SpatialGrid,
    config: &MatchConfig,
    seed: u64,
) -> Result<PairMatches, MatchError> {
    let mut matcher =
        CandidateMatcher::new(source, reference, reference_grid, config.clone()).with_seed(seed);

    let global_matches = matcher
        .global_match(config.top_percent, config.two_way_global)?
        .len();
    if global_matches < config.min_global_matches {
        return Err(MatchError::TooFewGlobalMatches {
            found: global_matches,
            required: config.min_global_matches,
        });
    }

    let fundamental = matcher.compute_fundamental()?;
    matcher.compute_epipolar_lines()?;
    match config.clustering {
        ClusteringStrategy::Fast => matcher.cluster_points_fast()?,
        ClusteringStrategy::Exact => matcher.cluster_points()?,
    };
    match config.ranking {
        RankingStrategy::Indexed => matcher.match_points()?,
        RankingStrategy::BruteForce => matcher.bf_match()?,
    };

    let mut matches = matcher.into_matches();
    matches.sort_unstable();
    Ok(PairMatches {
        matches,
        fundamental,
        global_matches,
    })
}

/// Seed for one pair, so that results do not depend on scheduling.
pub fn pair_seed(seed: u64, source_image: usize, reference_image: usize) -> u64 {
    let pair = ((source_image as u64) << 32) | reference_image as u64;
    (seed ^ pair).wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(29)
}

/// One spatial grid per image.
pub fn build_grids(images: &[ImageFeatures], cell_size: usize) -> Vec<SpatialGrid> {
    images
        .par_iter()
        .map(|image| SpatialGrid::for_image(image, cell_size))
        .collect()
}

/// Matches every pair `(j, i)` with `j < i`, image `j` being the source.
///
/// Pairs run in parallel and fail independently. A pair that ends with fewer
/// than `min_pair_matches` matches is reported as
/// [`MatchError::TooFewFinalMatches`]. Outcomes are ordered by reference image,
/// then source image.
///
/// # Errors
/// [`MatchError::GridCountMismatch`] unless there is one grid per image.
pub fn match_image_graph(
    images: &[ImageFeatures],
    grids: &[SpatialGrid],
    config: &MatchConfig,
) -> Result<Vec<PairOutcome>, MatchError> {
    if images.len() != grids.len() {
        return Err(MatchError::GridCountMismatch {
            images: images.len(),
            grids: grids.len(),
        });
    }
    let pairs: Vec<(usize, usize)> = (0..images.len())
        .flat_map(|i| (0..i).map(move |j| (j, i)))
        .collect();

    let outcomes = pairs
        .into_par_iter()
        .map(|(j, i)| {
            let seed = pair_seed(config.seed, j, i);
            let result = match_image_pair(&images[j], &images[i], &grids[i], config, seed)
                .and_then(|pair| {
                    if pair.matches.len() < config.min_pair_matches {
                        Err(MatchError::TooFewFinalMatches {
                            found: pair.matches.len(),
                            required: config.min_pair_matches,
                        })
                    } else {
                        Ok(pair)
                    }
                });
            match &result {
                Ok(pair) => log::info!("pair {j} -> {i}: {} matches", pair.matches.len()),
                Err(err) => log::warn!("pair {j} -> {i} skipped: {err}"),
            }
            PairOutcome {
                source_image: j,
                reference_image: i,
                result,
            }
        })
        .collect();
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_buffer::DescriptorBuffer;
    use crate::keypoint::Keypoint;

    fn blank_image(n: usize) -> ImageFeatures {
        let keypoints = (0..n).map(|i| Keypoint::new(20.0 + i as f32, 40.0)).collect();
        let descriptors = DescriptorBuffer::from_descriptors((0..n).map(|i| [i as u8; 128]));
        ImageFeatures::new(320, 240, keypoints, descriptors).unwrap()
    }

    #[test]
    fn pair_seeds_differ_per_pair() {
        assert_ne!(pair_seed(0, 0, 1), pair_seed(0, 1, 0));
        assert_ne!(pair_seed(0, 0, 1), pair_seed(1, 0, 1));
        assert_eq!(pair_seed(7, 2, 5), pair_seed(7, 2, 5));
    }

    #[test]
    fn graph_visits_every_lower_pair_once() {
        let images: Vec<ImageFeatures> = (0..4).map(|_| blank_image(10)).collect();
        let grids = build_grids(&images, 16);
        let outcomes = match_image_graph(&images, &grids, &MatchConfig::default()).unwrap();
        let pairs: Vec<(usize, usize)> = outcomes
            .iter()
            .map(|o| (o.source_image, o.reference_image))
            .collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2), (0, 3), (1, 3), (2, 3)]);
        // Two of ten features take part in global matching.
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.result, Err(MatchError::TooFewGlobalMatches { found: 2, .. }))));
    }

    #[test]
    fn graph_needs_one_grid_per_image() {
        let images: Vec<ImageFeatures> = (0..3).map(|_| blank_image(10)).collect();
        let grids = build_grids(&images[..2], 16);
        assert!(matches!(
            match_image_graph(&images, &grids, &MatchConfig::default()),
            Err(MatchError::GridCountMismatch { images: 3, grids: 2 })
        ));
    }
}
