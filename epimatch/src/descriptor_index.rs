//! Nearest-neighbour search over 128-byte descriptors.
//!
//! The matcher only needs "the k closest descriptors, within a search budget",
//! so the index is a trait with two implementations: a best-bin-first kd-tree
//! that stops after visiting `effort` points, and an exact tree from the
//! `kd-tree` crate (see [`kd_tree_index`](crate::kd_tree_index)).

use crate::descriptor_buffer::{squared_distance, Descriptor, DESCRIPTOR_LEN};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One search result: the position of the descriptor in the indexed set and
/// its squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub index: usize,
    pub squared_distance: u32,
}

pub trait NearestNeighborIndex {
    /// Number of indexed descriptors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `min(k, len)` nearest descriptors to `query`, closest first.
    ///
    /// `effort` bounds the number of descriptors compared; `0` means no bound.
    /// Bounded searches may return approximate neighbours.
    fn top_k(&self, query: &Descriptor, k: usize, effort: usize) -> Vec<Neighbor>;
}

/// Builds an index over a descriptor set. Lets the matcher pick the index
/// type once and build one index per candidate set.
pub trait IndexBuilder {
    type Index: NearestNeighborIndex;

    fn build(&self, descriptors: Vec<Descriptor>) -> Self::Index;
}

/// Maximum number of points in a leaf.
const LEAF_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Node {
    /// Points `order[start..end]`.
    Leaf { start: usize, end: usize },
    /// Points with `value[dim] <= cut` go left, `>= cut` go right.
    Split {
        dim: usize,
        cut: u8,
        left: usize,
        right: usize,
    },
}

/// A kd-tree searched in best-bin-first order.
///
/// Cells are visited in increasing order of their distance lower bound, and
/// the search stops once `effort` points have been compared and `k` results
/// are held. With an unlimited budget the search is exact.
///
/// # Examples
/// ```
/// use epimatch::descriptor_index::{BestBinFirstTree, NearestNeighborIndex};
///
/// let mut far = [0u8; 128];
/// far[0] = 200;
/// let tree = BestBinFirstTree::new(vec![far, [1u8; 128], [0u8; 128]]);
/// let nearest = tree.top_k(&[0u8; 128], 2, 0);
/// assert_eq!(nearest[0].index, 2);
/// assert_eq!(nearest[1].index, 1);
/// assert_eq!(nearest[1].squared_distance, 128);
/// ```
#[derive(Debug, Clone)]
pub struct BestBinFirstTree {
    points: Vec<Descriptor>,
    /// Permutation of point indices; every leaf owns a contiguous range.
    order: Vec<usize>,
    nodes: Vec<Node>,
}

impl BestBinFirstTree {
    pub fn new(points: Vec<Descriptor>) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::new();
        if !points.is_empty() {
            build_node(&points, &mut order, 0, points.len(), &mut nodes);
        }
        BestBinFirstTree {
            points,
            order,
            nodes,
        }
    }
}

/// Builds the subtree over `order[start..end]` and returns its node id.
/// The root always ends up at id 0.
fn build_node(
    points: &[Descriptor],
    order: &mut [usize],
    start: usize,
    end: usize,
    nodes: &mut Vec<Node>,
) -> usize {
    let id = nodes.len();
    nodes.push(Node::Leaf { start, end });
    if end - start <= LEAF_SIZE {
        return id;
    }

    let mut low = [u8::MAX; DESCRIPTOR_LEN];
    let mut high = [u8::MIN; DESCRIPTOR_LEN];
    for &i in &order[start..end] {
        for (d, &v) in points[i].iter().enumerate() {
            low[d] = low[d].min(v);
            high[d] = high[d].max(v);
        }
    }
    let (dim, spread) = (0..DESCRIPTOR_LEN)
        .map(|d| (d, high[d] - low[d]))
        .fold((0, 0), |best, cur| if cur.1 > best.1 { cur } else { best });
    if spread == 0 {
        // All points identical.
        return id;
    }

    let mid = start + (end - start) / 2;
    order[start..end].select_nth_unstable_by_key(mid - start, |&i| points[i][dim]);
    let cut = points[order[mid]][dim];

    let left = build_node(points, order, start, mid, nodes);
    let right = build_node(points, order, mid, end, nodes);
    nodes[id] = Node::Split {
        dim,
        cut,
        left,
        right,
    };
    id
}

/// Inserts `candidate` into the ascending list `best` of at most `k` entries.
/// Ties keep the entry that was found first.
fn push_bounded(best: &mut Vec<Neighbor>, k: usize, candidate: Neighbor) {
    if best.len() == k {
        match best.last() {
            Some(worst) if candidate.squared_distance < worst.squared_distance => {
                best.pop();
            }
            _ => return,
        }
    }
    let at = best.partition_point(|n| n.squared_distance <= candidate.squared_distance);
    best.insert(at, candidate);
}

impl NearestNeighborIndex for BestBinFirstTree {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn top_k(&self, query: &Descriptor, k: usize, effort: usize) -> Vec<Neighbor> {
        let k = k.min(self.points.len());
        let mut best: Vec<Neighbor> = Vec::with_capacity(k + 1);
        if k == 0 {
            return best;
        }

        let worst = |best: &Vec<Neighbor>| {
            if best.len() == k {
                best.last().map_or(u32::MAX, |n| n.squared_distance)
            } else {
                u32::MAX
            }
        };

        let mut queue = BinaryHeap::new();
        queue.push(Reverse((0u32, 0usize)));
        let mut visited = 0usize;

        while let Some(Reverse((bound, mut node))) = queue.pop() {
            if best.len() == k && (bound >= worst(&best) || (effort > 0 && visited >= effort)) {
                break;
            }
            loop {
                match self.nodes[node] {
                    Node::Leaf { start, end } => {
                        for &i in &self.order[start..end] {
                            let candidate = Neighbor {
                                index: i,
                                squared_distance: squared_distance(query, &self.points[i]),
                            };
                            push_bounded(&mut best, k, candidate);
                        }
                        visited += end - start;
                        break;
                    }
                    Node::Split {
                        dim,
                        cut,
                        left,
                        right,
                    } => {
                        let diff = query[dim] as i32 - cut as i32;
                        let (near, far) = if diff < 0 { (left, right) } else { (right, left) };
                        let far_bound = bound.max((diff * diff) as u32);
                        if far_bound < worst(&best) {
                            queue.push(Reverse((far_bound, far)));
                        }
                        node = near;
                    }
                }
            }
        }

        best
    }
}

/// Builds [`BestBinFirstTree`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestBinFirstBuilder;

impl IndexBuilder for BestBinFirstBuilder {
    type Index = BestBinFirstTree;

    fn build(&self, descriptors: Vec<Descriptor>) -> BestBinFirstTree {
        BestBinFirstTree::new(descriptors)
    }
}
