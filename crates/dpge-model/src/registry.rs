//! Model registry
//!
//! Maps a model identifier to its constructor. The identifier is resolved
//! once at startup; unknown identifiers fail there.

use crate::{DualViewModel, ModelConfig, ModelError, Result};
use candle_core::Device;
use dpge_domain::InteractionTables;
use dpge_graph::PropagationGraph;
use dpge_store::{SeededRng, TextCache};

/// Everything a constructor may need
pub struct ModelInputs<'a> {
    /// Hyperparameters
    pub config: &'a ModelConfig,
    /// Propagation graph
    pub graph: &'a PropagationGraph,
    /// Training interactions (for co-attention partners)
    pub tables: &'a InteractionTables,
    /// Cached sentence vectors, if any were loaded
    pub text: Option<&'a TextCache>,
    /// Tensor device
    pub device: &'a Device,
}

/// Builds a model under the given identifier
pub type ModelConstructor = fn(&str, ModelInputs<'_>, &mut SeededRng) -> Result<DualViewModel>;

fn build_dpge(name: &str, inputs: ModelInputs<'_>, rng: &mut SeededRng) -> Result<DualViewModel> {
    if !inputs.config.text.enabled {
        return DualViewModel::structural(name, inputs.config, inputs.graph, inputs.device);
    }
    build_dpge_text(name, inputs, rng)
}

fn build_dpge_text(name: &str, inputs: ModelInputs<'_>, rng: &mut SeededRng) -> Result<DualViewModel> {
    let text = inputs
        .text
        .ok_or_else(|| ModelError::TextRequired(name.to_string()))?;
    DualViewModel::with_text(
        name,
        inputs.config,
        inputs.graph,
        text,
        inputs.tables,
        rng,
        inputs.device,
    )
}

struct Entry {
    name: &'static str,
    description: &'static str,
    constructor: ModelConstructor,
}

/// Registry of model constructors
pub struct ModelRegistry {
    entries: Vec<Entry>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "dpge",
            "structural dual-view model; text fusion follows [model.text]",
            build_dpge,
        );
        registry.register(
            "dpge-text",
            "dual-view model with text co-attention fusion forced on",
            build_dpge_text,
        );
        registry
    }
}

impl ModelRegistry {
    /// Registry with no entries
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace a constructor
    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        constructor: ModelConstructor,
    ) {
        self.entries.retain(|e| e.name != name);
        self.entries.push(Entry {
            name,
            description,
            constructor,
        });
    }

    /// Registered identifiers with descriptions
    pub fn names(&self) -> Vec<(&'static str, &'static str)> {
        self.entries.iter().map(|e| (e.name, e.description)).collect()
    }

    /// Look up a constructor
    pub fn resolve(&self, name: &str) -> Result<ModelConstructor> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.constructor)
            .ok_or_else(|| {
                let available: Vec<_> = self.entries.iter().map(|e| e.name).collect();
                ModelError::UnknownModel(name.to_string(), available.join(", "))
            })
    }

    /// Resolve and construct in one step
    pub fn build(
        &self,
        name: &str,
        inputs: ModelInputs<'_>,
        rng: &mut SeededRng,
    ) -> Result<DualViewModel> {
        let constructor = self.resolve(name)?;
        let model = constructor(name, inputs, rng)?;
        tracing::info!(
            "Built model {} (dim {}, {} layers, text {})",
            name,
            model.config().embedding_size,
            model.config().n_layers,
            if model.text_enabled() { "on" } else { "off" }
        );
        Ok(model)
    }
}
