//! DPGE Trainer
//!
//! Training, evaluation and incremental growth for the dual-perspective
//! graph embedding engine.
//!
//! # Overview
//!
//! The trainer is responsible for:
//! - **Bilateral training**: epochs alternate between user queries and item
//!   queries over the same tables and graph
//! - **Negative sampling**: quadruples drawn from the success table, with an
//!   optional prefetch thread
//! - **Evaluation**: full-sort ranking in both directions with training
//!   interactions masked
//! - **Incremental updates**: new nodes and interactions folded into a
//!   trained engine without touching existing rows
//!
//! # Checkpoint Selection
//!
//! | Step | Direction | Evaluated on |
//! |------|-----------|--------------|
//! | Even epochs | user → item | both directions |
//! | Odd epochs | item → user | both directions |
//!
//! The kept checkpoint maximizes the **average** of the two directions'
//! selection metric, so a model that only ranks one side well is never picked.
//!
//! # Usage
//!
//! ## Training
//!
//! ```no_run
//! use candle_core::Device;
//! use dpge_domain::{InteractionTables, NodeCounts};
//! use dpge_model::{LossConfig, ModelConfig, ModelRegistry};
//! use dpge_trainer::{BilateralTrainer, EngineState, RankingEvaluator, TrainerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let train = InteractionTables::new(vec![(0, 0), (1, 1)], vec![(1, 0)], vec![]);
//! let valid = InteractionTables::new(vec![(0, 1)], vec![], vec![]);
//!
//! let mut engine = EngineState::build(
//!     &ModelRegistry::default(),
//!     "dpge",
//!     &ModelConfig::default(),
//!     &train,
//!     None,
//!     NodeCounts::default(),
//!     &Device::Cpu,
//! )?;
//! let config = TrainerConfig::default();
//! let evaluator = RankingEvaluator::new(&valid, engine.tables(), config.eval_batch_size);
//! let mut trainer = BilateralTrainer::new(config, LossConfig::default(), &engine)?;
//! let outcome = trainer.train(&mut engine, Some(&evaluator))?;
//! println!("best epoch {:?}, score {:?}", outcome.best_epoch, outcome.best_score);
//! # Ok(())
//! # }
//! ```
//!
//! ## Incremental Update
//!
//! ```no_run
//! # use candle_core::Device;
//! # use dpge_domain::{InteractionTables, NodeCounts};
//! # use dpge_model::{LossConfig, ModelConfig, ModelRegistry};
//! # use dpge_trainer::{EngineState, TrainerConfig};
//! use dpge_trainer::{GraphDelta, IncrementalUpdater};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let train = InteractionTables::new(vec![(0, 0)], vec![], vec![]);
//! # let config = ModelConfig::default();
//! # let mut engine = EngineState::build(&ModelRegistry::default(), "dpge", &config, &train, None, NodeCounts::default(), &Device::Cpu)?;
//! let delta = GraphDelta::new(InteractionTables::new(vec![(1, 0)], vec![], vec![]));
//! let mut updater = IncrementalUpdater::new(config.init.initializer, 7);
//! let outcome = updater.apply(
//!     &mut engine,
//!     &delta,
//!     &TrainerConfig::default(),
//!     &LossConfig::default(),
//!     None,
//!     None,
//! )?;
//! println!("+{} users", outcome.extend.new_users());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Presets
//!
//! ```
//! use dpge_trainer::TrainerConfig;
//!
//! // Default: balanced (lr 0.001, batch 1024, 100 epochs, patience 10)
//! let config = TrainerConfig::default();
//!
//! // Fast: smoke tests and toy graphs
//! let config = TrainerConfig::fast();
//!
//! // Thorough: long runs with generous patience
//! let config = TrainerConfig::thorough();
//! ```
//!
//! # Configuration
//!
//! The trainer can be configured via TOML:
//!
//! ```toml
//! [trainer]
//! learning_rate = 0.001
//! weight_decay = 0.0
//! batch_size = 1024
//! max_epochs = 100
//! patience = 10
//! eval_every = 1
//! eval_batch_size = 512
//! selection_metric = "recall@5"
//! seed = 2024
//! prefetch = true
//! resume_epochs = 5
//! ```

#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod evaluator;
mod incremental;
mod metrics;
mod sampler;
mod trainer;

pub use config::{SelectionMetric, TrainerConfig};
pub use engine::EngineState;
pub use error::{Result, TrainerError};
pub use evaluator::{HeldOut, RankingEvaluator, SeenMask};
pub use incremental::{ExtendOutcome, GraphDelta, IncrementalUpdater, UpdateOutcome};
pub use metrics::{DirectionReport, EpochRecord, EvalReport, TrainingMetrics};
pub use sampler::{Batch, NegativeSampler, Positives};
pub use trainer::{BilateralTrainer, StopReason, TrainState, TrainingOutcome};
