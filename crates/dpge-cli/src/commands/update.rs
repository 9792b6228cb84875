//! Update command implementation.

use crate::cli::UpdateArgs;
use crate::config::Settings;
use crate::data::DatasetDir;
use crate::error::Result;
use crate::output::Formatter;
use crate::session::Session;
use dpge_domain::traits::InteractionSource;
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Execute the update command.
///
/// Rebuilds the engine at the chosen checkpoint, folds the delta in and
/// resumes training. A run that trains nothing still stores the grown tables
/// as a new checkpoint so later commands can load them.
pub fn execute_update(
    args: UpdateArgs,
    settings: &Settings,
    formatter: &Formatter,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let session = Session::new(settings, &args.data)?;
    let store = session.open_store()?;
    let (mut engine, base) =
        session.restored_engine(&store, args.checkpoint.as_deref(), &args.applied)?;
    drop(store);

    let config = engine.model().config().clone();
    let sentence_dim = config.text.enabled.then_some(config.text.sentence_dim);
    let delta = DatasetDir::open(&args.delta)?.delta(sentence_dim)?;

    let mut trainer_config = settings.trainer.clone();
    if let Some(epochs) = args.epochs {
        trainer_config.resume_epochs = epochs;
    }
    let validation = session.dataset().validation()?;

    let mut updater = session.updater(&config).with_stop_flag(stop);
    let outcome = updater.apply(
        &mut engine,
        &delta,
        &trainer_config,
        &settings.loss,
        validation.as_ref(),
        Some(session.open_store()?),
    )?;

    let mut store = session.open_store()?;
    if let Some(text) = engine.text() {
        store.save_text(text)?;
    }
    let trained_id = outcome.training.as_ref().and_then(|t| t.checkpoint_id);
    let checkpoint_id = match trained_id {
        Some(id) => Some(id),
        None if outcome.extend.is_noop() => None,
        None => {
            let checkpoint = engine.capture()?.with_metadata(json!({
                "grown_from": base.id.to_string(),
                "delta": args.delta.display().to_string(),
            }));
            Some(store.save(&checkpoint)?)
        }
    };
    if !outcome.extend.is_noop() {
        tracing::info!(
            "Pass --applied {} to later commands on this dataset",
            args.delta.display()
        );
    }

    println!(
        "{}",
        formatter.format_update(&outcome, trainer_config.selection_metric, checkpoint_id)?
    );
    Ok(())
}
