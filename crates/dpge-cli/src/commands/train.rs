//! Train command implementation.

use crate::cli::TrainArgs;
use crate::config::Settings;
use crate::error::Result;
use crate::output::Formatter;
use crate::session::Session;
use dpge_domain::traits::InteractionSource;
use dpge_trainer::{BilateralTrainer, RankingEvaluator, TrainerConfig};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Trainer settings after applying `--preset`, `--epochs` and `--seed`.
pub fn trainer_config(args: &TrainArgs, settings: &Settings) -> Result<TrainerConfig> {
    let mut config = match args.preset {
        Some(preset) => preset.into(),
        None => settings.trainer.clone(),
    };
    if let Some(epochs) = args.epochs {
        config.max_epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

/// Execute the train command.
pub fn execute_train(
    args: TrainArgs,
    settings: &Settings,
    formatter: &Formatter,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let config = trainer_config(&args, settings)?;
    let session = Session::new(settings, &args.data)?;
    let (mut engine, model) = session.fresh_engine()?;
    tracing::info!("Training {} on {}", model, engine.graph().stats());

    let validation = session.dataset().validation()?;
    if validation.is_none() {
        tracing::warn!("No valid.txt; checkpoints are selected by training loss");
    }
    let evaluator = validation
        .as_ref()
        .map(|v| RankingEvaluator::new(v, engine.tables(), config.eval_batch_size));

    let mut store = session.open_store()?;
    if let Some(text) = engine.text() {
        store.save_text(text)?;
    }

    let mut trainer = BilateralTrainer::new(config.clone(), settings.loss.clone(), &engine)?
        .with_checkpoints(store)
        .with_stop_flag(stop);
    let outcome = trainer.train(&mut engine, evaluator.as_ref())?;

    let test_report = if args.test {
        match session.dataset().test()? {
            Some(test) => {
                let evaluator = RankingEvaluator::new(&test, engine.tables(), config.eval_batch_size);
                Some(evaluator.evaluate_bilateral(&engine.embed()?)?)
            }
            None => {
                tracing::warn!("--test given but {} has no test.txt", session.dataset().root().display());
                None
            }
        }
    } else {
        None
    };

    println!(
        "{}",
        formatter.format_training(&outcome, config.selection_metric, test_report.as_ref())?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn train_args(argv: &[&str]) -> TrainArgs {
        match Cli::parse_from(argv).command {
            Command::Train(args) => args,
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_overrides_apply_on_top_of_preset() {
        let args = train_args(&["dpge", "train", "-d", "toy", "--preset", "fast", "--epochs", "3"]);
        let config = trainer_config(&args, &Settings::default()).unwrap();
        assert_eq!(config.max_epochs, 3);
        assert_eq!(config.batch_size, TrainerConfig::fast().batch_size);
    }

    #[test]
    fn test_settings_used_without_preset() {
        let mut settings = Settings::default();
        settings.trainer.patience = 4;
        let args = train_args(&["dpge", "train", "-d", "toy", "--seed", "9"]);
        let config = trainer_config(&args, &settings).unwrap();
        assert_eq!(config.patience, 4);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = Settings::default();
        settings.trainer.learning_rate = 0.0;
        let args = train_args(&["dpge", "train", "-d", "toy"]);
        assert!(trainer_config(&args, &settings).is_err());
    }
}
