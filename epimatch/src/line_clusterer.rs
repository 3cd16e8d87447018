//! Grouping of source points whose epipolar lines cross the reference image
//! along (almost) the same chord.
//!
//! Points in one cluster share a single candidate search along the
//! representative chord, so the expensive grid query and index build happen
//! once per cluster instead of once per point.

use crate::config::DEFAULT_CLUSTER_MERGE_DISTANCE;
use crate::geometry::{rect_line_intersect, ImageRect, Line, LineFootprint};

/// Source points that share an epipolar footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct LineCluster {
    /// Source point indices, in the order they joined.
    pub members: Vec<usize>,
    /// Chord of the representative line through the reference image.
    pub footprint: LineFootprint,
    /// Source index whose line defines `footprint`.
    pub representative: usize,
}

impl LineCluster {
    fn new(representative: usize, footprint: LineFootprint) -> Self {
        LineCluster {
            members: vec![representative],
            footprint,
            representative,
        }
    }
}

/// Groups epipolar lines by their chord through `rect`.
///
/// Line `i` belongs to source point `i`. Lines that do not cut the rectangle
/// in exactly two points are left out of every cluster; every other index
/// ends up in exactly one cluster.
pub trait LineClusterer {
    fn cluster(&self, lines: &[Line], rect: &ImageRect) -> Vec<LineCluster>;
}

/// Integer chord endpoints `[x1, y1, x2, y2]`.
type Endpoints = [i32; 4];

fn endpoints(footprint: &LineFootprint) -> Endpoints {
    let r = footprint.rounded();
    [
        r.start.0 as i32,
        r.start.1 as i32,
        r.end.0 as i32,
        r.end.1 as i32,
    ]
}

/// True when both endpoint pairs are closer than `merge_distance` in L1.
fn within(a: &Endpoints, b: &Endpoints, merge_distance: i32) -> bool {
    let d1 = (a[0] - b[0]).abs() + (a[1] - b[1]).abs();
    let d2 = (a[2] - b[2]).abs() + (a[3] - b[3]).abs();
    d1 < merge_distance && d2 < merge_distance
}

/// Compares every line with the representative of every existing cluster
/// and joins the first one that is close enough.
#[derive(Debug, Clone, Copy)]
pub struct ExactLineClusterer {
    pub merge_distance: i32,
}

impl Default for ExactLineClusterer {
    fn default() -> Self {
        Self {
            merge_distance: DEFAULT_CLUSTER_MERGE_DISTANCE,
        }
    }
}

impl LineClusterer for ExactLineClusterer {
    fn cluster(&self, lines: &[Line], rect: &ImageRect) -> Vec<LineCluster> {
        let mut clusters: Vec<LineCluster> = Vec::new();
        let mut representatives: Vec<Endpoints> = Vec::new();
        let mut excluded = 0usize;

        for (index, line) in lines.iter().enumerate() {
            let Some(footprint) = rect_line_intersect(line, rect) else {
                excluded += 1;
                continue;
            };
            let ends = endpoints(&footprint);
            match representatives
                .iter()
                .position(|rep| within(rep, &ends, self.merge_distance))
            {
                Some(c) => clusters[c].members.push(index),
                None => {
                    representatives.push(ends);
                    clusters.push(LineCluster::new(index, footprint));
                }
            }
        }

        log::trace!(
            "ExactLineClusterer: {} lines, {excluded} without chord, {} clusters",
            lines.len(),
            clusters.len()
        );
        clusters
    }
}

/// Packs four 16-bit endpoint coordinates into one sortable key, `x1` in the
/// most significant bits.
///
/// # Examples
/// ```
/// use epimatch::line_clusterer::{pack_footprint, unpack_footprint};
/// let key = pack_footprint([12, -3, 640, 0]);
/// assert_eq!(unpack_footprint(key), [12, -3, 640, 0]);
/// ```
pub fn pack_footprint(ends: [i16; 4]) -> u64 {
    ends.iter()
        .fold(0u64, |key, &v| (key << 16) | (v as u16 as u64))
}

/// Inverse of [`pack_footprint`].
pub fn unpack_footprint(key: u64) -> [i16; 4] {
    [
        (key >> 48) as u16 as i16,
        (key >> 32) as u16 as i16,
        (key >> 16) as u16 as i16,
        key as u16 as i16,
    ]
}

/// Sorts lines by their packed endpoint key and merges each line into the
/// current cluster when it is close to the line before it in sorted order.
///
/// Much faster than [`ExactLineClusterer`] on large images, but lines that are
/// close without being neighbours in key order end up in different clusters,
/// so the two strategies can disagree near the merge distance.
#[derive(Debug, Clone, Copy)]
pub struct SortedLineClusterer {
    pub merge_distance: i32,
}

impl Default for SortedLineClusterer {
    fn default() -> Self {
        Self {
            merge_distance: DEFAULT_CLUSTER_MERGE_DISTANCE,
        }
    }
}

struct SortEntry {
    key: u64,
    index: usize,
    footprint: LineFootprint,
}

impl LineClusterer for SortedLineClusterer {
    fn cluster(&self, lines: &[Line], rect: &ImageRect) -> Vec<LineCluster> {
        let mut entries: Vec<SortEntry> = lines
            .iter()
            .enumerate()
            .filter_map(|(index, line)| {
                let footprint = rect_line_intersect(line, rect)?;
                let r = footprint.rounded();
                // `as` saturates, so far-out coordinates clamp to the i16 range.
                let key = pack_footprint([
                    r.start.0 as i16,
                    r.start.1 as i16,
                    r.end.0 as i16,
                    r.end.1 as i16,
                ]);
                Some(SortEntry {
                    key,
                    index,
                    footprint,
                })
            })
            .collect();
        let excluded = lines.len() - entries.len();
        entries.sort_unstable_by_key(|e| (e.key, e.index));

        let mut clusters: Vec<LineCluster> = Vec::new();
        let mut previous: Option<Endpoints> = None;
        for entry in &entries {
            let ends = unpack_footprint(entry.key).map(i32::from);
            let joins = previous.is_some_and(|prev| within(&prev, &ends, self.merge_distance));
            match clusters.last_mut() {
                Some(current) if joins => current.members.push(entry.index),
                _ => clusters.push(LineCluster::new(entry.index, entry.footprint)),
            }
            previous = Some(ends);
        }

        log::trace!(
            "SortedLineClusterer: {} lines, {excluded} without chord, {} clusters",
            lines.len(),
            clusters.len()
        );
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> ImageRect {
        ImageRect::new(200.0, 100.0)
    }

    /// A line crossing the image from `(0, y0)` to `(200, y1)`.
    fn crossing(y0: f64, y1: f64) -> Line {
        Line::through((0.0, y0), (200.0, y1))
    }

    fn assert_partition(clusters: &[LineCluster], expected: &[usize]) {
        let mut seen: Vec<usize> = clusters.iter().flat_map(|c| c.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn key_packing_orders_by_first_endpoint() {
        assert!(pack_footprint([1, 0, 0, 0]) > pack_footprint([0, 500, 500, 500]));
        assert_eq!(unpack_footprint(pack_footprint([-1, 2, -3, 4])), [-1, 2, -3, 4]);
    }

    #[test]
    fn exact_merges_close_lines() {
        let lines = [crossing(10.0, 20.0), crossing(11.0, 21.0), crossing(60.0, 40.0)];
        let clusters = ExactLineClusterer::default().cluster(&lines, &rect());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![0, 1]);
        assert_eq!(clusters[0].representative, 0);
        assert_eq!(clusters[1].members, vec![2]);
    }

    #[test]
    fn merge_distance_is_strict() {
        // Endpoints differ by exactly 4 px in y.
        let lines = [crossing(10.0, 20.0), crossing(14.0, 24.0)];
        let exact = ExactLineClusterer::default().cluster(&lines, &rect());
        let fast = SortedLineClusterer::default().cluster(&lines, &rect());
        assert_eq!(exact.len(), 2);
        assert_eq!(fast.len(), 2);
    }

    #[test]
    fn lines_missing_the_image_are_excluded() {
        let lines = [
            crossing(10.0, 20.0),
            Line::new(0.0, 1.0, 500.0), // y = -500
            crossing(50.0, 50.0),
        ];
        for clusters in [
            ExactLineClusterer::default().cluster(&lines, &rect()),
            SortedLineClusterer::default().cluster(&lines, &rect()),
        ] {
            assert_partition(&clusters, &[0, 2]);
        }
    }

    #[test]
    fn strategies_agree_on_well_separated_groups() {
        let mut lines = Vec::new();
        for group in 0..6 {
            let y = 8.0 + 14.0 * group as f64;
            for jitter in [0.0, 0.4, 1.1] {
                lines.push(crossing(y + jitter, 90.0 - y + jitter));
            }
        }
        let exact = ExactLineClusterer::default().cluster(&lines, &rect());
        let fast = SortedLineClusterer::default().cluster(&lines, &rect());
        assert_eq!(exact.len(), 6);
        assert_eq!(fast.len(), exact.len());
        assert_partition(&exact, &(0..18).collect::<Vec<_>>());
        assert_partition(&fast, &(0..18).collect::<Vec<_>>());
    }

    #[test]
    fn sorted_chains_through_previous_line() {
        // Each line is 3 px from the one before, 6 px from the first.
        let lines = [crossing(10.0, 20.0), crossing(13.0, 20.0), crossing(16.0, 20.0)];
        let fast = SortedLineClusterer::default().cluster(&lines, &rect());
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0].members, vec![0, 1, 2]);

        let exact = ExactLineClusterer::default().cluster(&lines, &rect());
        assert_eq!(exact.len(), 2);
    }
}
