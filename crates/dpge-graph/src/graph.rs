//! Propagation graph arena

use dpge_domain::{Block, NodeCounts};
use std::fmt;

/// Edge counts and coverage figures for one graph version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Node counts the graph was built for
    pub counts: NodeCounts,

    /// Distinct success interactions
    pub success_interactions: usize,

    /// Distinct user-only interactions
    pub user_only_interactions: usize,

    /// Distinct item-only interactions
    pub item_only_interactions: usize,

    /// Directed self-consistency edges
    pub self_edges: usize,

    /// All directed edges after deduplication
    pub directed_edges: usize,

    /// Copies whose only neighbor is their own counterpart
    pub self_only_copies: usize,
}

impl GraphStats {
    /// Fraction of possible directed copy pairs that carry an edge
    pub fn density(&self) -> f64 {
        let n = self.counts.total_copies() as f64;
        if n <= 1.0 {
            return 0.0;
        }
        self.directed_edges as f64 / (n * (n - 1.0))
    }
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | success={} user_only={} item_only={} | directed_edges={} (self={}) | self_only_copies={}",
            self.counts,
            self.success_interactions,
            self.user_only_interactions,
            self.item_only_interactions,
            self.directed_edges,
            self.self_edges,
            self.self_only_copies,
        )
    }
}

/// Role-partitioned propagation graph
///
/// Node-role copies are addressed by flat ids. Directed edges are stored in
/// parallel arrays sorted by `(src, dst)`; `offsets[c]..offsets[c + 1]` is the
/// edge range whose source is copy `c`.
#[derive(Debug, Clone)]
pub struct PropagationGraph {
    pub(crate) counts: NodeCounts,
    pub(crate) src: Vec<u32>,
    pub(crate) dst: Vec<u32>,
    pub(crate) weight: Vec<f32>,
    pub(crate) degree: Vec<u32>,
    pub(crate) offsets: Vec<usize>,
    pub(crate) stats: GraphStats,
}

impl PropagationGraph {
    /// Node counts this graph was built for
    pub fn counts(&self) -> NodeCounts {
        self.counts
    }

    /// Number of node-role copies
    pub fn num_copies(&self) -> usize {
        self.counts.total_copies()
    }

    /// Number of directed edges
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Flat id of copy `index` in `block`
    pub fn flat_id(&self, block: Block, index: usize) -> usize {
        block.offset(self.counts) + index
    }

    /// Inverse of [`flat_id`](Self::flat_id)
    pub fn locate(&self, flat: usize) -> Option<(Block, usize)> {
        Block::ALL.into_iter().find_map(|block| {
            let start = block.offset(self.counts);
            let end = start + block.len(self.counts);
            (flat >= start && flat < end).then(|| (block, flat - start))
        })
    }

    /// Source copy of each directed edge
    pub fn src(&self) -> &[u32] {
        &self.src
    }

    /// Destination copy of each directed edge
    pub fn dst(&self) -> &[u32] {
        &self.dst
    }

    /// Normalized weight of each directed edge
    pub fn weights(&self) -> &[f32] {
        &self.weight
    }

    /// Degree of a copy over the combined edge set
    pub fn degree(&self, flat: usize) -> usize {
        self.degree.get(flat).copied().unwrap_or(0) as usize
    }

    /// Outgoing neighbors of a copy with their edge weights
    pub fn neighbors(&self, flat: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        let range = match (self.offsets.get(flat), self.offsets.get(flat + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        };
        range.map(move |e| (self.dst[e] as usize, self.weight[e]))
    }

    /// Weight of the directed edge `a -> b`, if present
    pub fn weight(&self, a: usize, b: usize) -> Option<f32> {
        let start = *self.offsets.get(a)?;
        let end = *self.offsets.get(a + 1)?;
        let slice = &self.dst[start..end];
        slice
            .binary_search(&(b as u32))
            .ok()
            .map(|pos| self.weight[start + pos])
    }

    /// True when the directed edge `a -> b` exists
    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.weight(a, b).is_some()
    }

    /// Build statistics
    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }
}
