//! Incremental updates
//!
//! New nodes and interactions are folded into a trained engine without
//! touching existing embedding rows: the tables grow, the graph is rebuilt
//! from the union of old and new interactions, new text is appended, and
//! training resumes with a fresh optimizer.

use crate::{
    BilateralTrainer, EngineState, RankingEvaluator, Result, TrainerConfig, TrainerError,
    TrainingOutcome,
};
use dpge_domain::{InteractionTables, NodeCounts, NodeType};
use dpge_graph::GraphBuilder;
use dpge_model::LossConfig;
use dpge_store::{seeded_rng, CheckpointStore, Initializer, SeededRng};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// New interactions and text for an incremental update
#[derive(Debug, Clone, Default)]
pub struct GraphDelta {
    /// Interactions to add; may reference indices past the current counts
    pub interactions: InteractionTables,

    /// Encoded sentences per user
    pub user_text: Vec<(usize, Vec<Vec<f32>>)>,

    /// Encoded sentences per item
    pub item_text: Vec<(usize, Vec<Vec<f32>>)>,

    /// Exact number of new users; `None` infers it from the interactions
    pub declared_new_users: Option<usize>,

    /// Exact number of new items; `None` infers it from the interactions
    pub declared_new_items: Option<usize>,
}

impl GraphDelta {
    /// Delta carrying only interactions
    pub fn new(interactions: InteractionTables) -> Self {
        Self {
            interactions,
            ..Default::default()
        }
    }

    /// Declare how many users and items this delta introduces
    pub fn declaring(mut self, new_users: usize, new_items: usize) -> Self {
        self.declared_new_users = Some(new_users);
        self.declared_new_items = Some(new_items);
        self
    }

    /// Attach encoded sentences for one population
    pub fn with_text(mut self, node_type: NodeType, rows: Vec<(usize, Vec<Vec<f32>>)>) -> Self {
        match node_type {
            NodeType::User => self.user_text.extend(rows),
            NodeType::Item => self.item_text.extend(rows),
        }
        self
    }

    fn text(&self) -> [(NodeType, &[(usize, Vec<Vec<f32>>)]); 2] {
        [
            (NodeType::User, self.user_text.as_slice()),
            (NodeType::Item, self.item_text.as_slice()),
        ]
    }

    fn has_text(&self) -> bool {
        !self.user_text.is_empty() || !self.item_text.is_empty()
    }
}

/// What an extension changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendOutcome {
    /// Counts before the update
    pub previous: NodeCounts,
    /// Counts after the update
    pub counts: NodeCounts,
    /// Interactions not already present
    pub added_interactions: usize,
    /// Nodes that received text for the first time
    pub text_rows_added: usize,
    /// Store version after the update
    pub store_version: u64,
}

impl ExtendOutcome {
    /// Users appended
    pub fn new_users(&self) -> usize {
        self.counts.users - self.previous.users
    }

    /// Items appended
    pub fn new_items(&self) -> usize {
        self.counts.items - self.previous.items
    }

    /// True when the update changed nothing
    pub fn is_noop(&self) -> bool {
        self.counts == self.previous && self.added_interactions == 0 && self.text_rows_added == 0
    }
}

/// Extension plus the resumed training run
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// What the extension changed
    pub extend: ExtendOutcome,
    /// Resumed training, absent when `resume_epochs` is zero
    pub training: Option<TrainingOutcome>,
}

/// Grows a trained engine in place
///
/// Takes the engine by `&mut`, so it cannot run while a trainer holds it.
pub struct IncrementalUpdater {
    initializer: Initializer,
    rng: SeededRng,
    stop: Option<Arc<AtomicBool>>,
}

impl IncrementalUpdater {
    /// Updater drawing new rows from `initializer`
    pub fn new(initializer: Initializer, seed: u64) -> Self {
        Self {
            initializer,
            rng: seeded_rng(seed),
            stop: None,
        }
    }

    /// Share a stop flag with the resumed training run
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Counts after applying `delta`, or the reason it must be rejected
    pub fn validate(&self, engine: &EngineState, delta: &GraphDelta) -> Result<NodeCounts> {
        let current = engine.counts();
        let referenced = delta.interactions.counts_hint();

        let limit = |node_type: NodeType, declared: Option<usize>| -> Result<usize> {
            let have = current.of(node_type);
            let needed = referenced.of(node_type);
            match declared {
                Some(new) if needed > have + new => Err(TrainerError::InvalidDelta(format!(
                    "{} index {} beyond the {} declared new {}s (current count {})",
                    node_type,
                    needed - 1,
                    new,
                    node_type,
                    have
                ))),
                Some(new) => Ok(have + new),
                None => Ok(have.max(needed)),
            }
        };
        let counts = NodeCounts::new(
            limit(NodeType::User, delta.declared_new_users)?,
            limit(NodeType::Item, delta.declared_new_items)?,
        );

        if delta.has_text() {
            let cache = engine.text.as_ref().ok_or_else(|| {
                TrainerError::InvalidDelta("delta carries text but the engine has no text cache".into())
            })?;
            for (node_type, rows) in delta.text() {
                for (index, sentences) in rows {
                    if *index >= counts.of(node_type) {
                        return Err(TrainerError::InvalidDelta(format!(
                            "text for {} {} which does not exist after this update ({} {}s)",
                            node_type,
                            index,
                            counts.of(node_type),
                            node_type
                        )));
                    }
                    if let Some(bad) = sentences.iter().find(|s| s.len() != cache.dim()) {
                        return Err(TrainerError::InvalidDelta(format!(
                            "sentence vector for {} {} has dimension {}, expected {}",
                            node_type,
                            index,
                            bad.len(),
                            cache.dim()
                        )));
                    }
                }
            }
        }
        Ok(counts)
    }

    /// Grow tables, merge interactions, rebuild the graph and append text
    ///
    /// Everything is validated and built on copies first; the engine only
    /// changes once every step has succeeded. Existing embedding rows and
    /// existing text are never overwritten.
    pub fn extend(&mut self, engine: &mut EngineState, delta: &GraphDelta) -> Result<ExtendOutcome> {
        let counts = self.validate(engine, delta)?;
        let previous = engine.counts();
        tracing::info!("Extending engine from {} to {}", previous, counts);

        let store = engine.store.grown(counts, &self.initializer, &mut self.rng)?;
        let tables = engine.tables.union(&delta.interactions);
        let added_interactions = tables.len() - engine.tables.len();
        let graph = GraphBuilder::new(counts).build(&tables)?;

        let mut text = engine.text.clone();
        let mut text_rows_added = 0;
        if let Some(cache) = text.as_mut() {
            cache.grow_to(counts);
            for (node_type, rows) in delta.text() {
                for (index, sentences) in rows {
                    if cache.set_if_absent(node_type, *index, sentences.clone())? {
                        text_rows_added += 1;
                    } else {
                        tracing::debug!("{} {} already has text; keeping it", node_type, index);
                    }
                }
            }
        }

        engine.model.refresh(&graph, text.as_ref(), &tables)?;
        engine.store = store;
        engine.graph = graph;
        engine.tables = tables;
        engine.text = text;

        let outcome = ExtendOutcome {
            previous,
            counts,
            added_interactions,
            text_rows_added,
            store_version: engine.store.version(),
        };
        tracing::info!(
            "Extended: +{} users, +{} items, +{} interactions, +{} text rows (store version {})",
            outcome.new_users(),
            outcome.new_items(),
            outcome.added_interactions,
            outcome.text_rows_added,
            outcome.store_version
        );
        Ok(outcome)
    }

    /// Extend, then resume training for `resume_epochs`
    ///
    /// The resumed run gets a new optimizer and evaluates against
    /// `validation` with the merged interactions masked.
    pub fn apply(
        &mut self,
        engine: &mut EngineState,
        delta: &GraphDelta,
        trainer_config: &TrainerConfig,
        loss: &LossConfig,
        validation: Option<&InteractionTables>,
        checkpoints: Option<CheckpointStore>,
    ) -> Result<UpdateOutcome> {
        trainer_config.validate()?;
        let extend = self.extend(engine, delta)?;
        if trainer_config.resume_epochs == 0 {
            return Ok(UpdateOutcome {
                extend,
                training: None,
            });
        }

        let evaluator = validation.map(|v| {
            RankingEvaluator::new(v, engine.tables(), trainer_config.eval_batch_size)
        });
        let mut trainer = BilateralTrainer::new(trainer_config.clone(), loss.clone(), engine)?;
        if let Some(store) = checkpoints {
            trainer = trainer.with_checkpoints(store);
        }
        if let Some(flag) = &self.stop {
            trainer = trainer.with_stop_flag(Arc::clone(flag));
        }
        tracing::info!("Resuming training for {} epochs", trainer_config.resume_epochs);
        let training = trainer.train_for(engine, evaluator.as_ref(), trainer_config.resume_epochs)?;
        Ok(UpdateOutcome {
            extend,
            training: Some(training),
        })
    }
}
