//! Evaluate command implementation.

use crate::cli::{EvaluateArgs, SplitArg};
use crate::config::Settings;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use crate::session::Session;
use dpge_domain::traits::InteractionSource;
use dpge_trainer::RankingEvaluator;

/// Execute the evaluate command.
pub fn execute_evaluate(args: EvaluateArgs, settings: &Settings, formatter: &Formatter) -> Result<()> {
    let session = Session::new(settings, &args.data)?;
    let (label, held_out) = match args.split {
        SplitArg::Valid => ("valid", session.dataset().validation()?),
        SplitArg::Test => ("test", session.dataset().test()?),
    };
    let held_out = held_out.ok_or_else(|| {
        CliError::InvalidInput(format!(
            "{} has no {}.txt",
            session.dataset().root().display(),
            label
        ))
    })?;

    let store = session.open_store()?;
    let (engine, checkpoint) =
        session.restored_engine(&store, args.checkpoint.as_deref(), &args.applied)?;

    let evaluator = RankingEvaluator::new(&held_out, engine.tables(), settings.trainer.eval_batch_size);
    if evaluator.is_empty() {
        tracing::warn!("{}.txt has no queries inside the trained graph", label);
    }
    let report = evaluator.evaluate_bilateral(&engine.embed()?)?;
    println!("{}", formatter.format_report(label, Some(checkpoint.id), &report)?);
    Ok(())
}
