//! Engine construction shared by the commands.
//!
//! `train` builds a fresh engine from a dataset directory. The other commands
//! rebuild the engine from the same directory, replay any deltas applied
//! since training, and load a stored checkpoint on top.

use crate::cli::DataArgs;
use crate::config::Settings;
use crate::data::DatasetDir;
use crate::error::{CliError, Result};
use candle_core::Device;
use dpge_domain::traits::InteractionSource;
use dpge_domain::NodeCounts;
use dpge_model::{ModelConfig, ModelRegistry};
use dpge_store::{Checkpoint, CheckpointStore, TextCache};
use dpge_trainer::{EngineState, IncrementalUpdater};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One command's view of settings, dataset and checkpoint database.
pub struct Session<'a> {
    settings: &'a Settings,
    dataset: DatasetDir,
    db: PathBuf,
    model: Option<String>,
    registry: ModelRegistry,
    device: Device,
}

impl<'a> Session<'a> {
    /// Resolve the dataset directory and database path.
    pub fn new(settings: &'a Settings, args: &DataArgs) -> Result<Self> {
        Ok(Self {
            settings,
            dataset: DatasetDir::open(&args.data)?,
            db: args.db.clone().unwrap_or_else(|| settings.data.db.clone()),
            model: args.model.clone(),
            registry: ModelRegistry::default(),
            device: Device::Cpu,
        })
    }

    /// Dataset directory.
    pub fn dataset(&self) -> &DatasetDir {
        &self.dataset
    }

    /// Checkpoint database path.
    pub fn db(&self) -> &Path {
        &self.db
    }

    /// Effective settings.
    pub fn settings(&self) -> &Settings {
        self.settings
    }

    /// Open (or create) the checkpoint database.
    pub fn open_store(&self) -> Result<CheckpointStore> {
        Ok(CheckpointStore::new(&self.db)?)
    }

    /// Model identifier: `--model`, then the checkpoint's, then `[data].model`.
    pub fn model_name(&self, checkpoint: Option<&Checkpoint>) -> String {
        self.model
            .clone()
            .or_else(|| checkpoint.map(|c| c.model.clone()))
            .unwrap_or_else(|| self.settings.data.model.clone())
    }

    /// Model config for `model`.
    pub fn model_config(&self, model: &str) -> ModelConfig {
        self.settings.model_config_for(model)
    }

    /// Updater for growing engines built by this session.
    pub fn updater(&self, config: &ModelConfig) -> IncrementalUpdater {
        IncrementalUpdater::new(config.init.initializer, self.settings.trainer.seed)
    }

    fn text_cache(
        &self,
        config: &ModelConfig,
        stored: Option<TextCache>,
    ) -> Result<Option<TextCache>> {
        if !config.text.enabled {
            if self.dataset.has_text() {
                tracing::info!("Text files present but text fusion is off; ignoring them");
            }
            return Ok(None);
        }
        let mut cache =
            stored.unwrap_or_else(|| TextCache::new(config.text.sentence_dim, NodeCounts::default()));
        let encoded = self.dataset.encode_text(&mut cache)?;
        if cache.is_empty() {
            tracing::warn!(
                "Text fusion is on but {} has no node text; every node gets the zero text vector",
                self.dataset.root().display()
            );
        } else {
            tracing::info!("Text cache ready ({} nodes newly encoded)", encoded);
        }
        Ok(Some(cache))
    }

    /// Fresh engine over the dataset's training interactions.
    pub fn fresh_engine(&self) -> Result<(EngineState, String)> {
        let model = self.model_name(None);
        let config = self.model_config(&model);
        let tables = self.dataset.train()?;
        let text = self.text_cache(&config, None)?;
        let engine = EngineState::build(
            &self.registry,
            &model,
            &config,
            &tables,
            text,
            self.dataset.counts_hint()?,
            &self.device,
        )?;
        Ok((engine, model))
    }

    /// Load a checkpoint by id, or the latest one.
    pub fn load_checkpoint(&self, store: &CheckpointStore, id: Option<&str>) -> Result<Checkpoint> {
        match id {
            Some(id) => {
                let id = Uuid::parse_str(id)
                    .map_err(|e| CliError::InvalidInput(format!("bad checkpoint id '{}': {}", id, e)))?;
                Ok(store.load(id)?)
            }
            None => store
                .latest()?
                .ok_or_else(|| CliError::NoCheckpoint(self.db.clone())),
        }
    }

    /// Engine rebuilt from the dataset and `applied` deltas, with a stored
    /// checkpoint loaded.
    pub fn restored_engine(
        &self,
        store: &CheckpointStore,
        checkpoint: Option<&str>,
        applied: &[PathBuf],
    ) -> Result<(EngineState, Checkpoint)> {
        let checkpoint = self.load_checkpoint(store, checkpoint)?;
        let model = self.model_name(Some(&checkpoint));
        let config = self.model_config(&model);

        let deltas = applied
            .iter()
            .map(DatasetDir::open)
            .collect::<Result<Vec<_>>>()?;
        let mut counts = checkpoint.counts.max(self.dataset.counts_hint()?);
        for delta in &deltas {
            counts = counts.max(delta.counts_hint()?);
        }

        let stored_text = if config.text.enabled {
            Some(store.load_text(config.text.sentence_dim, counts)?)
        } else {
            None
        };
        let text = self.text_cache(&config, stored_text)?;
        let mut engine = EngineState::build(
            &self.registry,
            &model,
            &config,
            &self.dataset.train()?,
            text,
            counts,
            &self.device,
        )?;

        let mut updater = self.updater(&config);
        let sentence_dim = config.text.enabled.then_some(config.text.sentence_dim);
        for delta in &deltas {
            tracing::info!("Replaying delta {}", delta.root().display());
            updater.extend(&mut engine, &delta.delta(sentence_dim)?)?;
        }

        engine.restore(&checkpoint)?;
        tracing::info!(
            "Loaded checkpoint {} (model {}, epoch {}, {})",
            checkpoint.id,
            checkpoint.model,
            checkpoint.epoch,
            checkpoint.counts
        );
        Ok((engine, checkpoint))
    }
}
