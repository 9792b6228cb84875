//! End-to-end training on a toy bipartite graph

use candle_core::Device;
use dpge_domain::{Direction, InteractionTables, NodeCounts};
use dpge_model::{LossConfig, ModelConfig, ModelRegistry};
use dpge_store::CheckpointStore;
use dpge_trainer::{BilateralTrainer, EngineState, RankingEvaluator, StopReason, TrainerConfig};
use tempfile::TempDir;

/// Two communities: users 0..4 with items 0..4, users 4..8 with items 4..8
fn communities() -> (InteractionTables, InteractionTables) {
    let mut train = Vec::new();
    let mut valid = Vec::new();
    for user in 0..8usize {
        let base = if user < 4 { 0 } else { 4 };
        for k in 0..4usize {
            let item = base + k;
            if k == user % 4 {
                valid.push((user, item));
            } else {
                train.push((user, item));
            }
        }
    }
    (
        InteractionTables::new(train, vec![], vec![]),
        InteractionTables::new(valid, vec![], vec![]),
    )
}

fn model_config() -> ModelConfig {
    ModelConfig {
        embedding_size: 16,
        n_layers: 2,
        ..Default::default()
    }
}

fn engine(train: &InteractionTables) -> EngineState {
    EngineState::build(
        &ModelRegistry::default(),
        "dpge",
        &model_config(),
        train,
        None,
        NodeCounts::default(),
        &Device::Cpu,
    )
    .unwrap()
}

fn trainer_config() -> TrainerConfig {
    TrainerConfig {
        learning_rate: 0.01,
        batch_size: 24,
        max_epochs: 30,
        patience: 30,
        ..TrainerConfig::fast()
    }
}

#[test]
fn test_ranking_loss_decreases() {
    let (train, valid) = communities();
    let mut state = engine(&train);
    let config = trainer_config();
    let evaluator = RankingEvaluator::new(&valid, state.tables(), config.eval_batch_size);
    let mut trainer = BilateralTrainer::new(config, LossConfig::default(), &state).unwrap();
    let outcome = trainer.train(&mut state, Some(&evaluator)).unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxEpochs);
    assert_eq!(outcome.history.len(), 30);
    let first = outcome.history[0].loss.ranking;
    let late = outcome.history[28].loss.ranking;
    assert_eq!(outcome.history[28].direction, Direction::UserToItem);
    assert!(late < first, "ranking loss {} -> {}", first, late);

    let best = outcome.best_score.unwrap();
    assert!(best.is_finite());
    assert!(outcome.history.iter().all(|r| r.report.is_some()));
    let report = outcome.history[0].report.unwrap();
    assert_eq!(report.user_to_item.queries, 8);
    assert_eq!(report.item_to_user.queries, 8);
}

#[test]
fn test_best_checkpoint_persisted_and_restorable() {
    let (train, valid) = communities();
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("checkpoints.db");

    let mut state = engine(&train);
    let config = TrainerConfig {
        max_epochs: 6,
        ..trainer_config()
    };
    let evaluator = RankingEvaluator::new(&valid, state.tables(), config.eval_batch_size);
    let mut trainer = BilateralTrainer::new(config, LossConfig::default(), &state)
        .unwrap()
        .with_checkpoints(CheckpointStore::new(&db).unwrap());
    let outcome = trainer.train(&mut state, Some(&evaluator)).unwrap();
    let id = outcome.checkpoint_id.unwrap();
    assert!(outcome.metrics.checkpoints_saved >= 1);

    let store = CheckpointStore::new(&db).unwrap();
    let saved = store.load(id).unwrap();
    assert_eq!(Some(saved.epoch), outcome.best_epoch);
    assert_eq!(Some(saved.score), outcome.best_score);
    assert_eq!(store.latest().unwrap().unwrap().id, id);

    // a fresh engine restored from disk reproduces the selected model
    let mut restored = engine(&train);
    restored.restore(&saved).unwrap();
    let a = state.embed().unwrap().user_active.to_vec2::<f32>().unwrap();
    let b = restored.embed().unwrap().user_active.to_vec2::<f32>().unwrap();
    assert_eq!(a, b);

    let report_a = evaluator.evaluate_bilateral(&state.embed().unwrap()).unwrap();
    let report_b = evaluator.evaluate_bilateral(&restored.embed().unwrap()).unwrap();
    assert_eq!(report_a, report_b);
}

#[test]
fn test_same_seed_same_run() {
    let (train, _) = communities();
    let run = || {
        let mut state = engine(&train);
        let config = TrainerConfig {
            max_epochs: 3,
            ..trainer_config()
        };
        let mut trainer = BilateralTrainer::new(config, LossConfig::default(), &state).unwrap();
        trainer.train(&mut state, None).unwrap();
        state.embed().unwrap().item_active.to_vec2::<f32>().unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_recommendations_skip_training_items() {
    let (train, valid) = communities();
    let mut state = engine(&train);
    let config = TrainerConfig {
        max_epochs: 4,
        ..trainer_config()
    };
    let evaluator = RankingEvaluator::new(&valid, state.tables(), config.eval_batch_size);
    let mut trainer = BilateralTrainer::new(config, LossConfig::default(), &state).unwrap();
    trainer.train(&mut state, Some(&evaluator)).unwrap();

    let recs = evaluator
        .recommend(&state.embed().unwrap(), Direction::UserToItem, 0, 8)
        .unwrap();
    // user 0 trained on items 1, 2, 3
    assert_eq!(recs.len(), 5);
    assert!(recs.iter().all(|(item, _)| ![1, 2, 3].contains(item)));
    assert!(recs.windows(2).all(|w| w[0].1 >= w[1].1));
}
