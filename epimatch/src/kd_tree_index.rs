use crate::descriptor_buffer::Descriptor;
use crate::descriptor_index::{IndexBuilder, NearestNeighborIndex, Neighbor};
use kd_tree::{KdPoint, KdTree};

/// A descriptor tagged with its position in the indexed set.
#[derive(Debug, Clone, Copy)]
pub struct IndexedDescriptor {
    pub index: usize,
    pub values: Descriptor,
}

impl KdPoint for IndexedDescriptor {
    type Scalar = i32;
    type Dim = typenum::U128;
    fn at(&self, k: usize) -> i32 {
        self.values[k] as i32
    }
}

/// Exact nearest-neighbour search backed by a [KdTree] from the `kd_tree`
/// crate. The effort budget is ignored.
pub struct KdTreeIndex {
    tree: KdTree<IndexedDescriptor>,
    len: usize,
}

impl KdTreeIndex {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        let items: Vec<IndexedDescriptor> = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, values)| IndexedDescriptor { index, values })
            .collect();
        let len = items.len();
        KdTreeIndex {
            tree: KdTree::build(items),
            len,
        }
    }
}

impl NearestNeighborIndex for KdTreeIndex {
    fn len(&self) -> usize {
        self.len
    }

    fn top_k(&self, query: &Descriptor, k: usize, _effort: usize) -> Vec<Neighbor> {
        let k = k.min(self.len());
        if k == 0 {
            return Vec::new();
        }
        let probe = IndexedDescriptor {
            index: usize::MAX,
            values: *query,
        };
        let mut found: Vec<Neighbor> = self
            .tree
            .nearests(&probe, k)
            .into_iter()
            .map(|nearest| Neighbor {
                index: nearest.item.index,
                squared_distance: nearest.squared_distance as u32,
            })
            .collect();
        found.sort_by_key(|n| (n.squared_distance, n.index));
        found
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KdTreeBuilder;

impl IndexBuilder for KdTreeBuilder {
    type Index = KdTreeIndex;

    fn build(&self, descriptors: Vec<Descriptor>) -> KdTreeIndex {
        KdTreeIndex::new(descriptors)
    }
}
