//! Propagation Engine
//!
//! Light graph convolution over the role-partitioned arena. Each layer
//! replaces every copy's embedding with the weighted sum of its neighbors'
//! embeddings; the output is the mean of layers `0..=L`.

use crate::{ModelError, Result};
use candle_core::{Device, Tensor};
use dpge_domain::{Block, NodeCounts};
use dpge_graph::PropagationGraph;

/// Edge arrays of a [`PropagationGraph`] moved onto the tensor device
#[derive(Debug, Clone)]
pub struct GraphTensors {
    counts: NodeCounts,
    num_edges: usize,
    src: Tensor,
    dst: Tensor,
    weight: Tensor,
}

impl GraphTensors {
    /// Upload the edge list of `graph`
    pub fn new(graph: &PropagationGraph, device: &Device) -> Result<Self> {
        let num_edges = graph.num_edges();
        Ok(Self {
            counts: graph.counts(),
            num_edges,
            src: Tensor::from_slice(graph.src(), num_edges, device)?,
            dst: Tensor::from_slice(graph.dst(), num_edges, device)?,
            weight: Tensor::from_slice(graph.weights(), (num_edges, 1), device)?,
        })
    }

    /// Node counts the graph was built for
    pub fn counts(&self) -> NodeCounts {
        self.counts
    }

    /// Number of directed edges
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }
}

/// The four per-block embedding matrices, row-indexed by node index
#[derive(Debug, Clone)]
pub struct PropagatedEmbeddings {
    /// `[nU, D]`
    pub user_active: Tensor,
    /// `[nI, D]`
    pub item_passive: Tensor,
    /// `[nU, D]`
    pub user_passive: Tensor,
    /// `[nI, D]`
    pub item_active: Tensor,
}

impl PropagatedEmbeddings {
    /// Split a stacked `[2nU + 2nI, D]` matrix into its blocks
    pub fn split(all: &Tensor, counts: NodeCounts) -> Result<Self> {
        let part = |block: Block| all.narrow(0, block.offset(counts), block.len(counts));
        Ok(Self {
            user_active: part(Block::UserActive)?,
            item_passive: part(Block::ItemPassive)?,
            user_passive: part(Block::UserPassive)?,
            item_active: part(Block::ItemActive)?,
        })
    }

    /// Stack the blocks back in arena order
    pub fn stacked(&self) -> Result<Tensor> {
        Ok(Tensor::cat(
            &[
                &self.user_active,
                &self.item_passive,
                &self.user_passive,
                &self.item_active,
            ],
            0,
        )?)
    }

    /// Matrix of one block
    pub fn block(&self, block: Block) -> &Tensor {
        match block {
            Block::UserActive => &self.user_active,
            Block::ItemPassive => &self.item_passive,
            Block::UserPassive => &self.user_passive,
            Block::ItemActive => &self.item_active,
        }
    }

    /// Copy with every block cut from the autodiff graph
    pub fn detach(&self) -> Self {
        Self {
            user_active: self.user_active.detach(),
            item_passive: self.item_passive.detach(),
            user_passive: self.user_passive.detach(),
            item_active: self.item_active.detach(),
        }
    }

    /// Node counts covered
    pub fn counts(&self) -> Result<NodeCounts> {
        Ok(NodeCounts::new(
            self.user_active.dim(0)?,
            self.item_active.dim(0)?,
        ))
    }
}

/// Runs `L` layers of normalized neighbor aggregation
#[derive(Debug, Clone, Copy)]
pub struct PropagationEngine {
    n_layers: usize,
}

impl PropagationEngine {
    /// Engine with a fixed depth
    pub fn new(n_layers: usize) -> Self {
        Self { n_layers }
    }

    /// Propagation depth
    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    /// One aggregation step: `h'[dst] = Σ w(src, dst) · h[src]`
    fn layer(&self, h: &Tensor, graph: &GraphTensors) -> Result<Tensor> {
        if graph.num_edges == 0 {
            return Ok(h.zeros_like()?);
        }
        let messages = h
            .index_select(&graph.src, 0)?
            .broadcast_mul(&graph.weight)?;
        Ok(h.zeros_like()?.index_add(&graph.dst, &messages, 0)?)
    }

    /// Propagate stacked layer-0 embeddings `[2nU + 2nI, D]`
    ///
    /// Returns the mean of the `L + 1` layer outputs. With `L = 0` the
    /// result equals the input.
    pub fn propagate(&self, ego: &Tensor, graph: &GraphTensors) -> Result<Tensor> {
        let rows = ego.dim(0)?;
        if rows != graph.counts.total_copies() {
            return Err(ModelError::InvalidConfig(format!(
                "ego has {} rows, graph has {} copies",
                rows,
                graph.counts.total_copies()
            )));
        }
        if self.n_layers == 0 {
            return Ok(ego.clone());
        }

        let mut current = ego.clone();
        let mut sum = ego.clone();
        for _ in 0..self.n_layers {
            current = self.layer(&current, graph)?;
            sum = (sum + &current)?;
        }
        Ok((sum / (self.n_layers + 1) as f64)?)
    }

    /// Propagate and split into blocks
    pub fn propagate_blocks(
        &self,
        ego: &Tensor,
        graph: &GraphTensors,
    ) -> Result<PropagatedEmbeddings> {
        let out = self.propagate(ego, graph)?;
        PropagatedEmbeddings::split(&out, graph.counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpge_domain::InteractionTables;
    use dpge_graph::GraphBuilder;

    fn graph(tables: &InteractionTables, counts: NodeCounts) -> GraphTensors {
        let g = GraphBuilder::new(counts).build(tables).unwrap();
        GraphTensors::new(&g, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_zero_layers_is_identity() {
        let counts = NodeCounts::new(2, 2);
        let g = graph(&InteractionTables::new(vec![(0, 1)], vec![], vec![]), counts);
        let ego = Tensor::arange(0f32, 24.0, &Device::Cpu)
            .unwrap()
            .reshape((8, 3))
            .unwrap();
        let out = PropagationEngine::new(0).propagate(&ego, &g).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), ego.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_one_layer_hand_computed() {
        // One user, one item, no interactions: only self edges, each copy
        // has degree 1, so one layer swaps active and passive rows.
        let counts = NodeCounts::new(1, 1);
        let g = graph(&InteractionTables::default(), counts);
        let ego = Tensor::new(&[[1f32, 0.0], [0.0, 2.0], [3.0, 0.0], [0.0, 4.0]], &Device::Cpu)
            .unwrap();
        let out = PropagationEngine::new(1)
            .propagate_blocks(&ego, &g)
            .unwrap();
        // ua = (ua + up) / 2, ip = (ip + ia) / 2
        assert_eq!(out.user_active.to_vec2::<f32>().unwrap(), vec![vec![2.0, 0.0]]);
        assert_eq!(out.item_passive.to_vec2::<f32>().unwrap(), vec![vec![0.0, 3.0]]);
        assert_eq!(out.user_passive.to_vec2::<f32>().unwrap(), vec![vec![2.0, 0.0]]);
        assert_eq!(out.item_active.to_vec2::<f32>().unwrap(), vec![vec![0.0, 3.0]]);
    }

    #[test]
    fn test_self_edge_feeds_item_without_success() {
        let counts = NodeCounts::new(3, 3);
        let tables = InteractionTables::new(vec![(0, 0), (1, 1)], vec![(2, 2)], vec![]);
        let g = graph(&tables, counts);

        // Only item-passive(2) is non-zero at layer 0.
        let mut data = vec![0f32; counts.total_copies() * 2];
        let ip2 = Block::ItemPassive.offset(counts) + 2;
        data[ip2 * 2] = 1.0;
        let ego = Tensor::from_vec(data, (counts.total_copies(), 2), &Device::Cpu).unwrap();

        let out = PropagationEngine::new(1).propagate_blocks(&ego, &g).unwrap();
        let ia = out.item_active.to_vec2::<f32>().unwrap();
        assert!(ia[2][0] > 0.0);
        assert_eq!(ia[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_split_and_stack() {
        let counts = NodeCounts::new(2, 1);
        let all = Tensor::arange(0f32, 12.0, &Device::Cpu)
            .unwrap()
            .reshape((6, 2))
            .unwrap();
        let parts = PropagatedEmbeddings::split(&all, counts).unwrap();
        assert_eq!(parts.item_passive.to_vec2::<f32>().unwrap(), vec![vec![4.0, 5.0]]);
        assert_eq!(parts.counts().unwrap(), counts);
        assert_eq!(
            parts.stacked().unwrap().to_vec2::<f32>().unwrap(),
            all.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_row_count_mismatch() {
        let g = graph(&InteractionTables::default(), NodeCounts::new(1, 1));
        let ego = Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(PropagationEngine::new(1).propagate(&ego, &g).is_err());
    }
}
