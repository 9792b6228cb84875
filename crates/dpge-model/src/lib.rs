//! DPGE Numeric Core
//!
//! Everything that runs on the tensor engine:
//!
//! - [`TextCoAttentionEncoder`]: optional text branch fused into layer-0 rows
//! - [`PropagationEngine`]: `L` layers of normalized neighbor aggregation
//! - [`ScoringModel`]: `<ua, ip> + <up, ia>` in either direction
//! - [`LossAssembler`]: ranking, L2 and contrastive terms
//! - [`ModelRegistry`]: identifier to constructor mapping
//!
//! # Examples
//!
//! ```
//! use candle_core::Device;
//! use dpge_domain::{Direction, InteractionTables, NodeCounts};
//! use dpge_graph::GraphBuilder;
//! use dpge_model::{DualViewModel, ModelConfig, ScoringModel};
//! use dpge_store::{seeded_rng, EmbeddingStore};
//!
//! let tables = InteractionTables::new(vec![(0, 0), (1, 1)], vec![], vec![]);
//! let counts = NodeCounts::new(2, 2);
//! let graph = GraphBuilder::new(counts).build(&tables).unwrap();
//!
//! let config = ModelConfig { embedding_size: 8, ..Default::default() };
//! let store = EmbeddingStore::new(
//!     counts, 8, &config.init.initializer, &mut seeded_rng(1), &Device::Cpu,
//! ).unwrap();
//! let model = DualViewModel::structural("dpge", &config, &graph, &Device::Cpu).unwrap();
//!
//! let embeddings = model.embed(&store).unwrap();
//! let scores = ScoringModel::new(&embeddings)
//!     .full_sort(Direction::UserToItem, &[0, 1])
//!     .unwrap();
//! assert_eq!(scores.dims2().unwrap(), (2, 2));
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loss;
mod model;
mod propagation;
mod registry;
mod scoring;
mod text;

pub use config::{InitConfig, LossConfig, ModelConfig, TextConfig};
pub use error::{ModelError, Result};
pub use loss::{LossAssembler, LossBreakdown, PairBatch};
pub use model::{partners, DualViewModel, ForwardOutput};
pub use propagation::{GraphTensors, PropagatedEmbeddings, PropagationEngine};
pub use registry::{ModelConstructor, ModelInputs, ModelRegistry};
pub use scoring::ScoringModel;
pub use text::{tile_rows, TextCoAttentionEncoder};
