//! Engine state shared by training, evaluation and incremental updates

use crate::Result;
use candle_core::Device;
use dpge_domain::{InteractionTables, NodeCounts};
use dpge_graph::{GraphBuilder, PropagationGraph};
use dpge_model::{DualViewModel, ModelConfig, ModelInputs, ModelRegistry, PropagatedEmbeddings};
use dpge_store::{seeded_rng, Checkpoint, EmbeddingStore, TextCache};

/// Everything a trained engine consists of
///
/// Training borrows it mutably for the length of a run and the incremental
/// updater takes it exclusively, so no gradient step can interleave with
/// growth.
pub struct EngineState {
    pub(crate) model: DualViewModel,
    pub(crate) store: EmbeddingStore,
    pub(crate) graph: PropagationGraph,
    pub(crate) tables: InteractionTables,
    pub(crate) text: Option<TextCache>,
}

impl EngineState {
    /// Build a fresh engine over training interactions
    ///
    /// Node counts cover every index in `tables`, every node with cached
    /// text and at least `min_counts`.
    pub fn build(
        registry: &ModelRegistry,
        model_name: &str,
        config: &ModelConfig,
        tables: &InteractionTables,
        text: Option<TextCache>,
        min_counts: NodeCounts,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let tables = tables.deduplicated();
        let mut counts = tables.counts_hint().max(min_counts);
        if let Some(cache) = &text {
            counts = counts.max(cache.counts());
        }
        let mut text = text;
        if let Some(cache) = text.as_mut() {
            cache.grow_to(counts);
        }

        let graph = GraphBuilder::new(counts).build(&tables)?;
        let mut rng = seeded_rng(config.init.seed);
        let store = EmbeddingStore::new(
            counts,
            config.embedding_size,
            &config.init.initializer,
            &mut rng,
            device,
        )?;
        let model = registry.build(
            model_name,
            ModelInputs {
                config,
                graph: &graph,
                tables: &tables,
                text: text.as_ref(),
                device,
            },
            &mut rng,
        )?;

        Ok(Self {
            model,
            store,
            graph,
            tables,
            text,
        })
    }

    /// Model over the current graph
    pub fn model(&self) -> &DualViewModel {
        &self.model
    }

    /// Embedding tables
    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    /// Propagation graph
    pub fn graph(&self) -> &PropagationGraph {
        &self.graph
    }

    /// Training interactions the graph was built from
    pub fn tables(&self) -> &InteractionTables {
        &self.tables
    }

    /// Cached sentence vectors
    pub fn text(&self) -> Option<&TextCache> {
        self.text.as_ref()
    }

    /// Current node counts
    pub fn counts(&self) -> NodeCounts {
        self.store.counts()
    }

    /// Propagated embeddings for inference
    pub fn embed(&self) -> Result<PropagatedEmbeddings> {
        Ok(self.model.embed(&self.store)?)
    }

    /// Snapshot tables and encoder weights
    pub fn capture(&self) -> Result<Checkpoint> {
        Ok(self.model.capture(&self.store)?)
    }

    /// Load a checkpoint; rows it does not cover keep their current values
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.model.restore(&mut self.store, checkpoint)?;
        tracing::debug!("Engine now at epoch {} of checkpoint {}", checkpoint.epoch, checkpoint.id);
        Ok(())
    }
}
