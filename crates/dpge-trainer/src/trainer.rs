//! Bilateral training loop
//!
//! Epochs alternate between sampling user queries and item queries over the
//! same tables and graph. Every evaluation scores both directions, and the
//! checkpoint kept is the one with the best average of the two.

use crate::sampler::{Batch, NegativeSampler};
use crate::{
    EngineState, EpochRecord, EvalReport, RankingEvaluator, Result, TrainerConfig, TrainerError,
    TrainingMetrics,
};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use dpge_domain::Direction;
use dpge_model::{LossAssembler, LossBreakdown, LossConfig};
use dpge_store::{seeded_rng, Checkpoint, CheckpointStore, SeededRng};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;
use uuid::Uuid;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The epoch budget ran out
    MaxEpochs,
    /// Patience evaluations passed without improvement
    EarlyStopped,
    /// The stop flag was raised
    Interrupted,
}

impl StopReason {
    /// Human-readable label
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxEpochs => "max-epochs",
            StopReason::EarlyStopped => "early-stopped",
            StopReason::Interrupted => "interrupted",
        }
    }
}

/// Where the trainer is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    /// Running (or about to run) an epoch in this direction
    TrainDirection(Direction),
    /// Finished
    Stopped(StopReason),
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Epoch of the selected checkpoint
    pub best_epoch: Option<usize>,
    /// Selection score of the selected checkpoint
    pub best_score: Option<f64>,
    /// One record per completed epoch
    pub history: Vec<EpochRecord>,
    /// Why the loop ended
    pub stop_reason: StopReason,
    /// Selected checkpoint, already loaded back into the engine
    pub checkpoint: Option<Checkpoint>,
    /// Id under which the selected checkpoint was persisted
    pub checkpoint_id: Option<Uuid>,
    /// Totals across the run
    pub metrics: TrainingMetrics,
}

#[derive(Debug, Default)]
struct EpochStats {
    batches: usize,
    discarded: usize,
    loss: LossBreakdown,
}

impl EpochStats {
    fn add(&mut self, loss: &LossBreakdown) {
        self.batches += 1;
        self.loss.ranking += loss.ranking;
        self.loss.regularization += loss.regularization;
        self.loss.mutual_user += loss.mutual_user;
        self.loss.mutual_item += loss.mutual_item;
        self.loss.total += loss.total;
    }

    fn mean(&self) -> LossBreakdown {
        let n = self.batches.max(1) as f32;
        LossBreakdown {
            ranking: self.loss.ranking / n,
            regularization: self.loss.regularization / n,
            mutual_user: self.loss.mutual_user / n,
            mutual_item: self.loss.mutual_item / n,
            total: self.loss.total / n,
        }
    }
}

struct Best {
    epoch: usize,
    score: f64,
    checkpoint: Checkpoint,
    id: Option<Uuid>,
}

/// Trains an [`EngineState`] with alternating query directions
///
/// Owns its optimizer, so a new trainer (for example after an incremental
/// update) starts with fresh moment estimates over the current tables.
///
/// # Examples
///
/// ```no_run
/// use candle_core::Device;
/// use dpge_domain::{InteractionTables, NodeCounts};
/// use dpge_model::{LossConfig, ModelConfig, ModelRegistry};
/// use dpge_trainer::{BilateralTrainer, EngineState, RankingEvaluator, TrainerConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let train = InteractionTables::new(vec![(0, 0), (1, 1)], vec![], vec![]);
/// let valid = InteractionTables::new(vec![(0, 1)], vec![], vec![]);
/// let mut state = EngineState::build(
///     &ModelRegistry::default(),
///     "dpge",
///     &ModelConfig::default(),
///     &train,
///     None,
///     NodeCounts::default(),
///     &Device::Cpu,
/// )?;
///
/// let config = TrainerConfig::fast();
/// let evaluator = RankingEvaluator::new(&valid, state.tables(), config.eval_batch_size);
/// let mut trainer = BilateralTrainer::new(config, LossConfig::default(), &state)?;
/// let outcome = trainer.train(&mut state, Some(&evaluator))?;
/// println!("{}", outcome.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct BilateralTrainer {
    config: TrainerConfig,
    loss: LossAssembler,
    optimizer: AdamW,
    rng: SeededRng,
    metrics: TrainingMetrics,
    state: TrainState,
    stop: Arc<AtomicBool>,
    checkpoints: Option<CheckpointStore>,
}

impl BilateralTrainer {
    /// Create a trainer with a fresh optimizer over the engine's parameters
    pub fn new(config: TrainerConfig, loss: LossConfig, engine: &EngineState) -> Result<Self> {
        config.validate()?;
        loss.validate()?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(engine.model.trainable_vars(&engine.store), params)?;
        Ok(Self {
            rng: seeded_rng(config.seed),
            loss: LossAssembler::new(loss),
            optimizer,
            metrics: TrainingMetrics::new(),
            state: TrainState::TrainDirection(Direction::UserToItem),
            stop: Arc::new(AtomicBool::new(false)),
            checkpoints: None,
            config,
        })
    }

    /// Persist every new best checkpoint to `store`
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Share an externally owned stop flag
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = flag;
        self
    }

    /// Flag that stops the loop before the next epoch when set
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Current loop state
    pub fn state(&self) -> TrainState {
        self.state
    }

    /// Trainer configuration
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Running totals
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Hand back the checkpoint store
    pub fn into_checkpoints(self) -> Option<CheckpointStore> {
        self.checkpoints
    }

    /// Train for up to `max_epochs` epochs
    pub fn train(
        &mut self,
        engine: &mut EngineState,
        evaluator: Option<&RankingEvaluator>,
    ) -> Result<TrainingOutcome> {
        self.train_for(engine, evaluator, self.config.max_epochs)
    }

    /// Train for up to `epochs` epochs
    ///
    /// Without held-out pairs (no evaluator, or an empty one) each evaluation
    /// scores the epoch by its negated mean loss. The selected checkpoint is
    /// loaded back into `engine` before returning.
    pub fn train_for(
        &mut self,
        engine: &mut EngineState,
        evaluator: Option<&RankingEvaluator>,
        epochs: usize,
    ) -> Result<TrainingOutcome> {
        let started = Instant::now();
        let evaluator = evaluator.filter(|e| !e.is_empty());
        let sampler = NegativeSampler::new(
            &engine.tables.success,
            engine.store.snapshot(),
            self.config.batch_size,
        )?;

        tracing::info!(
            "Training {} for up to {} epochs ({} batches/epoch, selection {}{})",
            engine.model.name(),
            epochs,
            sampler.batches_per_epoch(),
            self.config.selection_metric,
            if evaluator.is_some() { "" } else { ", no held-out pairs: loss" }
        );

        let mut history = Vec::new();
        let mut best: Option<Best> = None;
        let mut since_improved = 0;
        let mut stop_reason = StopReason::MaxEpochs;

        for epoch in 0..epochs {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!("Stop requested, ending before epoch {}", epoch);
                stop_reason = StopReason::Interrupted;
                break;
            }

            let direction = Direction::for_epoch(epoch);
            self.state = TrainState::TrainDirection(direction);
            let stats = self.run_epoch(engine, &sampler, direction)?;
            self.metrics.record_epoch();
            let loss = stats.mean();

            let mut record = EpochRecord {
                epoch,
                direction,
                loss,
                batches: stats.batches,
                discarded: stats.discarded,
                report: None,
                score: None,
                improved: false,
            };

            let last = epoch + 1 == epochs;
            if (epoch + 1) % self.config.eval_every == 0 || last {
                let report = match evaluator {
                    Some(evaluator) => Some(evaluator.evaluate_bilateral(&engine.embed()?)?),
                    None => None,
                };
                self.metrics.record_evaluation();
                // An epoch whose batches were all discarded has no loss to
                // rank by and cannot be selected.
                let score = match &report {
                    _ if stats.batches == 0 => None,
                    Some(r) => Some(r.selection_score(self.config.selection_metric)),
                    None => Some(-f64::from(loss.total)),
                };
                if score.is_none() {
                    tracing::warn!(
                        "Epoch {} applied no updates ({} batches discarded); not scored",
                        epoch + 1,
                        stats.discarded
                    );
                }
                record.report = report;
                record.score = score;

                match score {
                    Some(score) if best.as_ref().map_or(true, |b| score > b.score) => {
                        best = Some(self.keep_best(
                            engine,
                            epoch,
                            direction,
                            score,
                            record.report.as_ref(),
                        )?);
                        record.improved = true;
                        since_improved = 0;
                    }
                    _ => since_improved += 1,
                }
            }

            tracing::info!(
                "Epoch {}/{} ({}): loss {:.4}, {} batches{}{}",
                epoch + 1,
                epochs,
                direction,
                loss.total,
                stats.batches,
                record
                    .score
                    .map(|s| format!(", score {:.4}", s))
                    .unwrap_or_default(),
                if record.improved { " *" } else { "" }
            );
            history.push(record);

            if since_improved >= self.config.patience {
                tracing::info!(
                    "Early stopping after epoch {}: no improvement in {} evaluations",
                    epoch + 1,
                    since_improved
                );
                stop_reason = StopReason::EarlyStopped;
                break;
            }
        }

        self.state = TrainState::Stopped(stop_reason);
        if let Some(best) = &best {
            engine.restore(&best.checkpoint)?;
        }
        self.metrics.total_runtime_secs += started.elapsed().as_secs_f64();
        tracing::info!(
            "Training stopped ({}). Final metrics:\n{}",
            stop_reason.as_str(),
            self.metrics.summary()
        );

        Ok(TrainingOutcome {
            best_epoch: best.as_ref().map(|b| b.epoch),
            best_score: best.as_ref().map(|b| b.score),
            checkpoint_id: best.as_ref().and_then(|b| b.id),
            checkpoint: best.map(|b| b.checkpoint),
            history,
            stop_reason,
            metrics: self.metrics.clone(),
        })
    }

    fn keep_best(
        &mut self,
        engine: &EngineState,
        epoch: usize,
        direction: Direction,
        score: f64,
        report: Option<&EvalReport>,
    ) -> Result<Best> {
        let mut checkpoint = engine.capture()?.with_epoch(epoch, direction, score);
        if let Some(report) = report {
            checkpoint = checkpoint.with_metadata(serde_json::to_value(report)?);
        }
        let id = match self.checkpoints.as_mut() {
            Some(store) => {
                let id = store.save(&checkpoint)?;
                self.metrics.record_checkpoint();
                tracing::info!("Saved checkpoint {} (epoch {}, score {:.4})", id, epoch + 1, score);
                Some(id)
            }
            None => None,
        };
        Ok(Best {
            epoch,
            score,
            checkpoint,
            id,
        })
    }

    /// One pass over the positives in `direction`
    fn run_epoch(
        &mut self,
        engine: &EngineState,
        sampler: &NegativeSampler,
        direction: Direction,
    ) -> Result<EpochStats> {
        let n = sampler.batches_per_epoch();
        let mut stats = EpochStats::default();

        if !self.config.prefetch {
            for _ in 0..n {
                let batch = sampler.sample(direction, &mut self.rng);
                let batch = self.fresh(engine, sampler, batch)?;
                self.step(engine, &batch, &mut stats)?;
            }
            return Ok(stats);
        }

        // Producer samples batch k+1 while the consumer trains on batch k.
        let seed: u64 = self.rng.gen();
        std::thread::scope(|scope| -> Result<()> {
            let (tx, rx) = mpsc::sync_channel::<Batch>(1);
            let producer = scope.spawn(move || {
                let mut rng = seeded_rng(seed);
                for _ in 0..n {
                    if tx.send(sampler.sample(direction, &mut rng)).is_err() {
                        break;
                    }
                }
            });
            for batch in rx.iter() {
                let batch = self.fresh(engine, sampler, batch)?;
                self.step(engine, &batch, &mut stats)?;
            }
            producer
                .join()
                .map_err(|_| TrainerError::Sampler("prefetch thread panicked".into()))
        })?;
        Ok(stats)
    }

    /// Replace a batch drawn against an outdated store version
    fn fresh(&mut self, engine: &EngineState, sampler: &NegativeSampler, batch: Batch) -> Result<Batch> {
        match engine.store.check(&batch.snapshot) {
            Ok(()) => Ok(batch),
            Err(e) if e.is_retryable() => {
                tracing::warn!("{}; resampling batch", e);
                self.metrics.record_stale_resample();
                Ok(sampler.sample_with(batch.direction, engine.store.snapshot(), &mut self.rng))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forward, loss and one optimizer step, or nothing at all
    fn step(&mut self, engine: &EngineState, batch: &Batch, stats: &mut EpochStats) -> Result<()> {
        let output = engine.model.forward(&engine.store)?;
        let (loss, parts) = self.loss.compute(&batch.pairs, &output)?;
        if !parts.is_finite() {
            tracing::warn!("Discarding batch with non-finite loss: {:?}", parts);
            self.metrics.record_discarded();
            stats.discarded += 1;
            return Ok(());
        }
        self.optimizer.backward_step(&loss)?;
        self.metrics.record_batch(&parts);
        stats.add(&parts);
        Ok(())
    }
}
