//! The dual-view model: text fusion, propagation and parameter bookkeeping

use crate::{
    GraphTensors, ModelConfig, ModelError, PropagatedEmbeddings, PropagationEngine, Result,
    TextCoAttentionEncoder,
};
use candle_core::{Device, Tensor, Var};
use dpge_domain::{Block, InteractionTables, NodeCounts, NodeType};
use dpge_graph::PropagationGraph;
use dpge_store::{
    Checkpoint, EmbeddingStore, NamedTensor, PaddedText, SeededRng, StoreError, TextCache,
};

/// Layer-0 and propagated embeddings of one forward pass
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Store rows plus text fusion, before propagation
    pub ego: PropagatedEmbeddings,

    /// Mean over layers `0..=L`
    pub propagated: PropagatedEmbeddings,
}

/// Partner item each user co-attends against
///
/// The first success partner in table order, else the first user-only
/// partner, else none.
pub fn partners(tables: &InteractionTables, n_users: usize) -> Vec<Option<usize>> {
    let mut success = vec![None; n_users];
    let mut user_only = vec![None; n_users];
    for &(user, item) in &tables.success {
        if let Some(slot) = success.get_mut(user) {
            slot.get_or_insert(item);
        }
    }
    for &(user, item) in &tables.user_only {
        if let Some(slot) = user_only.get_mut(user) {
            slot.get_or_insert(item);
        }
    }
    success
        .into_iter()
        .zip(user_only)
        .map(|(s, u)| s.or(u))
        .collect()
}

struct TextBranch {
    encoder: TextCoAttentionEncoder,
    users: PaddedText,
    items: PaddedText,
    partners: Vec<Option<usize>>,
}

impl TextBranch {
    fn inputs(
        text: &TextCache,
        tables: &InteractionTables,
        device: &Device,
    ) -> Result<(PaddedText, PaddedText, Vec<Option<usize>>)> {
        let users = text.padded(NodeType::User, device)?;
        let items = text.padded(NodeType::Item, device)?;
        let partners = partners(tables, text.counts().users);
        Ok((users, items, partners))
    }
}

/// Role-partitioned graph model over an [`EmbeddingStore`]
///
/// The store owns the embedding tables; the model owns the graph tensors,
/// the optional text encoder and its cached inputs.
pub struct DualViewModel {
    name: String,
    config: ModelConfig,
    engine: PropagationEngine,
    graph: GraphTensors,
    text: Option<TextBranch>,
    device: Device,
}

impl DualViewModel {
    /// Model without text fusion
    pub fn structural(
        name: &str,
        config: &ModelConfig,
        graph: &PropagationGraph,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let mut config = config.clone();
        config.text.enabled = false;
        Ok(Self {
            name: name.to_string(),
            engine: PropagationEngine::new(config.n_layers),
            graph: GraphTensors::new(graph, device)?,
            text: None,
            device: device.clone(),
            config,
        })
    }

    /// Model fusing cached sentence vectors into layer-0 rows
    pub fn with_text(
        name: &str,
        config: &ModelConfig,
        graph: &PropagationGraph,
        text: &TextCache,
        tables: &InteractionTables,
        rng: &mut SeededRng,
        device: &Device,
    ) -> Result<Self> {
        let mut config = config.clone();
        config.text.enabled = true;
        config.validate()?;
        if text.dim() != config.text.sentence_dim {
            return Err(StoreError::DimensionMismatch {
                expected: config.text.sentence_dim,
                found: text.dim(),
            }
            .into());
        }

        let encoder = TextCoAttentionEncoder::new(
            config.text.sentence_dim,
            config.embedding_size,
            config.text.attention_hidden,
            rng,
            device,
        )?;
        let (users, items, partners) = TextBranch::inputs(text, tables, device)?;
        tracing::info!(
            "Text fusion enabled: {} users and {} items with text",
            text.nodes_with_text(NodeType::User),
            text.nodes_with_text(NodeType::Item)
        );

        Ok(Self {
            name: name.to_string(),
            engine: PropagationEngine::new(config.n_layers),
            graph: GraphTensors::new(graph, device)?,
            text: Some(TextBranch {
                encoder,
                users,
                items,
                partners,
            }),
            device: device.clone(),
            config,
        })
    }

    /// Registry identifier this model was built under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Node counts of the current graph
    pub fn counts(&self) -> NodeCounts {
        self.graph.counts()
    }

    /// True when text fusion is active
    pub fn text_enabled(&self) -> bool {
        self.text.is_some()
    }

    /// Text encoder, if text fusion is active
    pub fn text_encoder(&self) -> Option<&TextCoAttentionEncoder> {
        self.text.as_ref().map(|t| &t.encoder)
    }

    /// Swap in a rebuilt graph and refreshed text inputs
    ///
    /// Encoder weights are kept.
    pub fn refresh(
        &mut self,
        graph: &PropagationGraph,
        text: Option<&TextCache>,
        tables: &InteractionTables,
    ) -> Result<()> {
        let graph = GraphTensors::new(graph, &self.device)?;
        if let Some(branch) = self.text.as_mut() {
            let cache = text.ok_or_else(|| ModelError::TextRequired(self.name.clone()))?;
            let (users, items, partners) = TextBranch::inputs(cache, tables, &self.device)?;
            branch.users = users;
            branch.items = items;
            branch.partners = partners;
        }
        self.graph = graph;
        Ok(())
    }

    /// Per-node text vectors `([nU, D], [nI, D])`
    pub fn text_vectors(&self) -> Result<Option<(Tensor, Tensor)>> {
        let Some(branch) = self.text.as_ref() else {
            return Ok(None);
        };
        let (item_reps, item_vectors) = branch.encoder.encode_items(&branch.items)?;
        let user_vectors = branch.encoder.encode_users(
            &branch.users,
            &item_reps,
            &branch.items.mask,
            &branch.partners,
        )?;
        Ok(Some((user_vectors, item_vectors)))
    }

    /// Layer-0 embeddings: store rows, plus text vectors when enabled
    fn ego(&self, store: &EmbeddingStore) -> Result<PropagatedEmbeddings> {
        let counts = self.graph.counts();
        if store.counts() != counts {
            return Err(ModelError::CountMismatch {
                store: store.counts(),
                graph: counts,
            });
        }
        if store.dim() != self.config.embedding_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.embedding_size,
                found: store.dim(),
            }
            .into());
        }

        let mut ego = PropagatedEmbeddings {
            user_active: store.tensor(Block::UserActive).clone(),
            item_passive: store.tensor(Block::ItemPassive).clone(),
            user_passive: store.tensor(Block::UserPassive).clone(),
            item_active: store.tensor(Block::ItemActive).clone(),
        };
        if let Some((users, items)) = self.text_vectors()? {
            if users.dim(0)? != counts.users || items.dim(0)? != counts.items {
                return Err(ModelError::CountMismatch {
                    store: NodeCounts::new(users.dim(0)?, items.dim(0)?),
                    graph: counts,
                });
            }
            ego.user_active = (&ego.user_active + &users)?;
            ego.user_passive = (&ego.user_passive + &users)?;
            ego.item_passive = (&ego.item_passive + &items)?;
            ego.item_active = (&ego.item_active + &items)?;
        }
        Ok(ego)
    }

    /// Differentiable forward pass
    pub fn forward(&self, store: &EmbeddingStore) -> Result<ForwardOutput> {
        let ego = self.ego(store)?;
        let propagated = self.engine.propagate_blocks(&ego.stacked()?, &self.graph)?;
        Ok(ForwardOutput { ego, propagated })
    }

    /// Propagated embeddings cut from the autodiff graph, for inference
    pub fn embed(&self, store: &EmbeddingStore) -> Result<PropagatedEmbeddings> {
        Ok(self.forward(store)?.propagated.detach())
    }

    /// Everything the optimizer updates: the four tables and encoder weights
    pub fn trainable_vars(&self, store: &EmbeddingStore) -> Vec<Var> {
        let mut vars = store.vars();
        if let Some(encoder) = self.text_encoder() {
            vars.extend(encoder.named_vars().into_iter().map(|(_, v)| v.clone()));
        }
        vars
    }

    /// Encoder weights for a checkpoint (empty without text fusion)
    pub fn text_params(&self) -> Result<Vec<NamedTensor>> {
        match self.text_encoder() {
            Some(encoder) => encoder.export(),
            None => Ok(Vec::new()),
        }
    }

    /// Capture store tables and encoder weights
    pub fn capture(&self, store: &EmbeddingStore) -> Result<Checkpoint> {
        Ok(Checkpoint::capture(store, &self.name, self.config.n_layers)?
            .with_text_params(self.text_params()?))
    }

    /// Load a checkpoint into `store` and the text encoder
    ///
    /// Fails before touching anything when the config hash differs or the
    /// checkpoint carries encoder weights this model cannot hold. A text model
    /// restored from a checkpoint without encoder weights keeps its fresh
    /// encoder.
    pub fn restore(&self, store: &mut EmbeddingStore, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.ensure_compatible(self.config.config_hash(), self.text_enabled())?;
        store.restore(checkpoint, self.config.config_hash())?;
        if let Some(encoder) = self.text_encoder() {
            if checkpoint.has_text_weights() {
                encoder.load(&checkpoint.text_params)?;
            } else {
                tracing::warn!(
                    "Checkpoint {} has no text-encoder weights; keeping fresh encoder",
                    checkpoint.id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpge_graph::GraphBuilder;
    use dpge_store::{seeded_rng, Initializer};

    fn setup(config: &ModelConfig) -> (PropagationGraph, EmbeddingStore) {
        let tables = InteractionTables::new(vec![(0, 0), (1, 1)], vec![(2, 2)], vec![]);
        let counts = NodeCounts::new(3, 3);
        let graph = GraphBuilder::new(counts).build(&tables).unwrap();
        let store = EmbeddingStore::new(
            counts,
            config.embedding_size,
            &Initializer::default(),
            &mut seeded_rng(3),
            &Device::Cpu,
        )
        .unwrap();
        (graph, store)
    }

    #[test]
    fn test_partners() {
        let tables = InteractionTables::new(vec![(1, 4), (1, 2)], vec![(0, 3), (1, 0)], vec![(2, 2)]);
        assert_eq!(partners(&tables, 3), vec![Some(3), Some(4), None]);
    }

    #[test]
    fn test_zero_layers_returns_store_rows() {
        let config = ModelConfig {
            embedding_size: 4,
            n_layers: 0,
            ..Default::default()
        };
        let (graph, store) = setup(&config);
        let model = DualViewModel::structural("dpge", &config, &graph, &Device::Cpu).unwrap();
        let out = model.embed(&store).unwrap();
        for block in Block::ALL {
            assert_eq!(out.block(block).to_vec2::<f32>().unwrap(), store.rows(block).unwrap());
        }
    }

    #[test]
    fn test_count_mismatch() {
        let config = ModelConfig {
            embedding_size: 4,
            ..Default::default()
        };
        let (graph, store) = setup(&config);
        let model = DualViewModel::structural("dpge", &config, &graph, &Device::Cpu).unwrap();
        let bigger = store
            .grown(NodeCounts::new(4, 3), &Initializer::default(), &mut seeded_rng(1))
            .unwrap();
        assert!(matches!(model.forward(&bigger), Err(ModelError::CountMismatch { .. })));
    }

    #[test]
    fn test_text_fusion_changes_only_nodes_with_text() {
        let mut config = ModelConfig {
            embedding_size: 4,
            n_layers: 0,
            ..Default::default()
        };
        config.text.sentence_dim = 3;
        config.text.attention_hidden = 2;
        let (graph, store) = setup(&config);

        let mut text = TextCache::new(3, NodeCounts::new(3, 3));
        text.set_if_absent(NodeType::Item, 0, vec![vec![1.0, 0.5, 0.0]]).unwrap();
        text.set_if_absent(NodeType::User, 0, vec![vec![0.0, 1.0, 0.0]]).unwrap();
        let tables = InteractionTables::new(vec![(0, 0), (1, 1)], vec![(2, 2)], vec![]);

        let model = DualViewModel::with_text(
            "dpge-text",
            &config,
            &graph,
            &text,
            &tables,
            &mut seeded_rng(9),
            &Device::Cpu,
        )
        .unwrap();
        assert!(model.text_enabled());
        let out = model.embed(&store).unwrap();

        let raw = store.rows(Block::ItemActive).unwrap();
        let fused = out.item_active.to_vec2::<f32>().unwrap();
        assert_ne!(fused[0], raw[0]);
        assert_eq!(fused[1], raw[1]);
        assert_eq!(fused[2], raw[2]);
        assert_eq!(model.trainable_vars(&store).len(), 4 + 9);
    }

    #[test]
    fn test_restore_rejects_text_weights_on_structural_model() {
        let config = ModelConfig {
            embedding_size: 4,
            ..Default::default()
        };
        let (graph, mut store) = setup(&config);
        let model = DualViewModel::structural("dpge", &config, &graph, &Device::Cpu).unwrap();
        let checkpoint = model
            .capture(&store)
            .unwrap()
            .with_text_params(vec![NamedTensor {
                name: "projection".into(),
                rows: 1,
                cols: 1,
                data: vec![0.0],
            }]);
        assert!(matches!(
            model.restore(&mut store, &checkpoint),
            Err(ModelError::Store(StoreError::TextWeightsWithoutEncoder))
        ));
    }
}
