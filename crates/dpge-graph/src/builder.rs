//! Graph construction from interaction tables

use crate::{GraphError, GraphStats, PropagationGraph};
use dpge_domain::{Block, InteractionKind, InteractionTables, NodeCounts, NodeType};

/// Builds a [`PropagationGraph`] for fixed node counts
///
/// Counts may exceed the indices referenced by the tables; nodes without any
/// interaction still get their self-consistency edge.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder {
    counts: NodeCounts,
}

impl GraphBuilder {
    /// Create a builder for the given node counts
    pub fn new(counts: NodeCounts) -> Self {
        Self { counts }
    }

    /// Create a builder sized to the indices referenced by `tables`
    pub fn fitted(tables: &InteractionTables) -> Self {
        Self::new(tables.counts_hint())
    }

    /// Node counts this builder targets
    pub fn counts(&self) -> NodeCounts {
        self.counts
    }

    /// Build the graph, re-deriving every weight from scratch
    pub fn build(&self, tables: &InteractionTables) -> Result<PropagationGraph, GraphError> {
        let counts = self.counts;
        let n = counts.total_copies();
        if n > u32::MAX as usize {
            return Err(GraphError::TooLarge(n));
        }

        let tables = tables.deduplicated();
        self.check_ranges(&tables)?;

        let id = |block: Block, index: usize| block.offset(counts) + index;
        let mut pairs: Vec<(u32, u32)> = Vec::with_capacity(4 * tables.len() + 2 * n);
        let mut undirected = |a: usize, b: usize| {
            pairs.push((a as u32, b as u32));
            pairs.push((b as u32, a as u32));
        };

        for &(u, i) in &tables.success {
            undirected(id(Block::UserActive, u), id(Block::ItemPassive, i));
            undirected(id(Block::UserPassive, u), id(Block::ItemActive, i));
        }
        for &(u, i) in &tables.user_only {
            undirected(id(Block::UserActive, u), id(Block::ItemPassive, i));
        }
        for &(u, i) in &tables.item_only {
            undirected(id(Block::ItemActive, i), id(Block::UserPassive, u));
        }
        for u in 0..counts.users {
            undirected(id(Block::UserActive, u), id(Block::UserPassive, u));
        }
        for i in 0..counts.items {
            undirected(id(Block::ItemActive, i), id(Block::ItemPassive, i));
        }
        let self_edges = 2 * (counts.users + counts.items);

        // Overlapping kinds can emit the same copy pair twice; the edge set is a set.
        pairs.sort_unstable();
        pairs.dedup();

        let mut degree = vec![0u32; n];
        for &(a, _) in &pairs {
            degree[a as usize] += 1;
        }

        let mut offsets = vec![0usize; n + 1];
        for &(a, _) in &pairs {
            offsets[a as usize + 1] += 1;
        }
        for c in 0..n {
            offsets[c + 1] += offsets[c];
        }

        let norm = |c: u32| 1.0 / (degree[c as usize].max(1) as f64).sqrt();
        let mut src = Vec::with_capacity(pairs.len());
        let mut dst = Vec::with_capacity(pairs.len());
        let mut weight = Vec::with_capacity(pairs.len());
        for &(a, b) in &pairs {
            src.push(a);
            dst.push(b);
            weight.push((norm(a) * norm(b)) as f32);
        }

        let self_only_copies = degree.iter().filter(|&&d| d <= 1).count();
        let stats = GraphStats {
            counts,
            success_interactions: tables.success.len(),
            user_only_interactions: tables.user_only.len(),
            item_only_interactions: tables.item_only.len(),
            self_edges,
            directed_edges: pairs.len(),
            self_only_copies,
        };

        if self_only_copies > 0 {
            tracing::debug!(
                "{} of {} copies have no interaction neighbors",
                self_only_copies,
                n
            );
        }
        tracing::info!("Built propagation graph: {}", stats);

        Ok(PropagationGraph {
            counts,
            src,
            dst,
            weight,
            degree,
            offsets,
            stats,
        })
    }

    fn check_ranges(&self, tables: &InteractionTables) -> Result<(), GraphError> {
        for kind in InteractionKind::ALL {
            for &(u, i) in tables.table(kind) {
                if u >= self.counts.users {
                    return Err(GraphError::IndexOutOfRange {
                        node_type: NodeType::User,
                        index: u,
                        count: self.counts.users,
                    });
                }
                if i >= self.counts.items {
                    return Err(GraphError::IndexOutOfRange {
                        node_type: NodeType::Item,
                        index: i,
                        count: self.counts.items,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> (InteractionTables, PropagationGraph) {
        let tables = InteractionTables::new(vec![(0, 0), (1, 1)], vec![(2, 2)], vec![]);
        let graph = GraphBuilder::new(NodeCounts::new(3, 3)).build(&tables).unwrap();
        (tables, graph)
    }

    #[test]
    fn test_success_edge_emits_four_directed_edges() {
        let tables = InteractionTables::new(vec![(0, 0)], vec![], vec![]);
        let graph = GraphBuilder::new(NodeCounts::new(1, 1)).build(&tables).unwrap();

        let ua = graph.flat_id(Block::UserActive, 0);
        let ip = graph.flat_id(Block::ItemPassive, 0);
        let up = graph.flat_id(Block::UserPassive, 0);
        let ia = graph.flat_id(Block::ItemActive, 0);

        assert!(graph.has_edge(ua, ip) && graph.has_edge(ip, ua));
        assert!(graph.has_edge(up, ia) && graph.has_edge(ia, up));
        // 4 from the success edge + 4 self-consistency edges
        assert_eq!(graph.num_edges(), 8);
        assert_eq!(graph.stats().self_edges, 4);
    }

    #[test]
    fn test_one_sided_edges_touch_one_role_pair() {
        let (_, graph) = example();
        let ua2 = graph.flat_id(Block::UserActive, 2);
        let ip2 = graph.flat_id(Block::ItemPassive, 2);
        let up2 = graph.flat_id(Block::UserPassive, 2);
        let ia2 = graph.flat_id(Block::ItemActive, 2);

        assert!(graph.has_edge(ua2, ip2));
        assert!(!graph.has_edge(up2, ia2));
        assert!(!graph.has_edge(ia2, up2));
    }

    #[test]
    fn test_item_only_edge() {
        let tables = InteractionTables::new(vec![], vec![], vec![(0, 1)]);
        let graph = GraphBuilder::new(NodeCounts::new(1, 2)).build(&tables).unwrap();
        let ia1 = graph.flat_id(Block::ItemActive, 1);
        let up0 = graph.flat_id(Block::UserPassive, 0);
        let ua0 = graph.flat_id(Block::UserActive, 0);
        let ip1 = graph.flat_id(Block::ItemPassive, 1);

        assert!(graph.has_edge(ia1, up0) && graph.has_edge(up0, ia1));
        assert!(!graph.has_edge(ua0, ip1));
    }

    #[test]
    fn test_self_only_copy_keeps_counterpart_edge() {
        let (_, graph) = example();
        let ia2 = graph.flat_id(Block::ItemActive, 2);
        let ip2 = graph.flat_id(Block::ItemPassive, 2);

        let neighbors: Vec<_> = graph.neighbors(ia2).collect();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].0, ip2);
        assert!(neighbors[0].1 > 0.0);
    }

    #[test]
    fn test_weights_are_normalized() {
        let (_, graph) = example();
        let ua0 = graph.flat_id(Block::UserActive, 0);
        let ip0 = graph.flat_id(Block::ItemPassive, 0);
        // ua0: {ip0, up0}; ip0: {ua0, ia0}
        assert_eq!(graph.degree(ua0), 2);
        assert_eq!(graph.degree(ip0), 2);
        let w = graph.weight(ua0, ip0).unwrap();
        assert!((w - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_isolated_nodes_are_not_an_error() {
        let graph = GraphBuilder::new(NodeCounts::new(2, 2))
            .build(&InteractionTables::default())
            .unwrap();
        assert_eq!(graph.num_edges(), 8);
        assert_eq!(graph.stats().self_only_copies, 8);
        for (_, w) in graph.neighbors(0) {
            assert!((w - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_duplicate_rows_do_not_inflate_degree() {
        let once = InteractionTables::new(vec![(0, 0)], vec![], vec![]);
        let twice = InteractionTables::new(vec![(0, 0), (0, 0)], vec![(0, 0)], vec![]);
        let counts = NodeCounts::new(1, 1);
        let a = GraphBuilder::new(counts).build(&once).unwrap();
        let b = GraphBuilder::new(counts).build(&twice).unwrap();
        assert_eq!(a.src(), b.src());
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn test_out_of_range_index() {
        let tables = InteractionTables::new(vec![(0, 5)], vec![], vec![]);
        let err = GraphBuilder::new(NodeCounts::new(1, 2)).build(&tables).unwrap_err();
        assert_eq!(
            err,
            GraphError::IndexOutOfRange {
                node_type: NodeType::Item,
                index: 5,
                count: 2
            }
        );
    }

    #[test]
    fn test_locate_inverts_flat_id() {
        let (_, graph) = example();
        for block in Block::ALL {
            for index in 0..3 {
                let flat = graph.flat_id(block, index);
                assert_eq!(graph.locate(flat), Some((block, index)));
            }
        }
        assert_eq!(graph.locate(graph.num_copies()), None);
    }

    #[test]
    fn test_fitted_builder() {
        let (tables, _) = example();
        assert_eq!(GraphBuilder::fitted(&tables).counts(), NodeCounts::new(3, 3));
    }
}
