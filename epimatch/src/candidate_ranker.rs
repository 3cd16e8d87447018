use crate::config::{DEFAULT_EFFORT_DIVISOR, DEFAULT_LOCAL_EFFORT_MIN};
use crate::descriptor_buffer::{squared_distance, Descriptor, DescriptorBuffer};
use crate::descriptor_index::{IndexBuilder, NearestNeighborIndex, Neighbor};

/// Finds the two reference descriptors closest to a query among a candidate
/// subset of the reference image.
///
/// A ranker is prepared once per candidate set and then queried for every
/// source point that shares the set. Indices in the results are reference
/// feature indices, not positions in the candidate list.
pub trait CandidateRanker {
    fn prepare(&mut self, candidates: &[usize], references: &DescriptorBuffer);

    /// The best and second-best candidates, or `None` when fewer than two
    /// candidates are prepared.
    fn top2(&self, query: &Descriptor) -> Option<[Neighbor; 2]>;
}

/// Lowe's ratio test on squared distances: accept when
/// `sqrt(best / second) <= threshold`.
///
/// A zero second distance means two exact copies compete, which is rejected
/// as ambiguous.
///
/// # Examples
/// ```
/// use epimatch::candidate_ranker::ratio_test;
/// assert!(ratio_test(10, 100, 0.6));
/// assert!(!ratio_test(90, 100, 0.6));
/// assert!(!ratio_test(0, 0, 0.6));
/// ```
pub fn ratio_test(best: u32, second: u32, threshold: f64) -> bool {
    if second == 0 {
        return false;
    }
    (best as f64 / second as f64).sqrt() <= threshold
}

/// Builds a search index over each candidate set and queries it with a budget
/// that grows with the set size.
pub struct IndexedRanker<B: IndexBuilder> {
    builder: B,
    effort_min: usize,
    effort_divisor: usize,
    candidates: Vec<usize>,
    index: Option<B::Index>,
}

impl<B: IndexBuilder> IndexedRanker<B> {
    pub fn new(builder: B) -> Self {
        Self::with_effort(builder, DEFAULT_LOCAL_EFFORT_MIN, DEFAULT_EFFORT_DIVISOR)
    }

    pub fn with_effort(builder: B, effort_min: usize, effort_divisor: usize) -> Self {
        IndexedRanker {
            builder,
            effort_min,
            effort_divisor: effort_divisor.max(1),
            candidates: Vec::new(),
            index: None,
        }
    }

    /// Search budget for the prepared set: `max(effort_min, |candidates| / divisor)`.
    pub fn effort(&self) -> usize {
        (self.candidates.len() / self.effort_divisor).max(self.effort_min)
    }
}

impl<B: IndexBuilder> CandidateRanker for IndexedRanker<B> {
    fn prepare(&mut self, candidates: &[usize], references: &DescriptorBuffer) {
        self.candidates = candidates.to_vec();
        self.index = Some(self.builder.build(references.gather(candidates)));
    }

    fn top2(&self, query: &Descriptor) -> Option<[Neighbor; 2]> {
        let index = self.index.as_ref()?;
        let found = index.top_k(query, 2, self.effort());
        match found.as_slice() {
            [first, second] => Some([
                Neighbor {
                    index: self.candidates[first.index],
                    ..*first
                },
                Neighbor {
                    index: self.candidates[second.index],
                    ..*second
                },
            ]),
            _ => None,
        }
    }
}

/// Compares the query against every candidate.
#[derive(Debug, Clone, Default)]
pub struct BruteForceRanker {
    candidates: Vec<(usize, Descriptor)>,
}

impl BruteForceRanker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandidateRanker for BruteForceRanker {
    fn prepare(&mut self, candidates: &[usize], references: &DescriptorBuffer) {
        self.candidates = candidates.iter().map(|&i| (i, references[i])).collect();
    }

    fn top2(&self, query: &Descriptor) -> Option<[Neighbor; 2]> {
        if self.candidates.len() < 2 {
            return None;
        }
        let mut first = Neighbor {
            index: usize::MAX,
            squared_distance: u32::MAX,
        };
        let mut second = first;
        for (index, descriptor) in &self.candidates {
            let d = squared_distance(query, descriptor);
            if d < first.squared_distance {
                second = first;
                first = Neighbor {
                    index: *index,
                    squared_distance: d,
                };
            } else if d < second.squared_distance {
                second = Neighbor {
                    index: *index,
                    squared_distance: d,
                };
            }
        }
        Some([first, second])
    }
}
