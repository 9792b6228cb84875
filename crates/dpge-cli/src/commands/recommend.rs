//! Recommend command implementation.

use crate::cli::RecommendArgs;
use crate::config::Settings;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use crate::session::Session;
use dpge_domain::{Direction, InteractionTables};
use dpge_trainer::RankingEvaluator;

/// Execute the recommend command.
///
/// Candidates the query already interacted with in training are skipped.
pub fn execute_recommend(args: RecommendArgs, settings: &Settings, formatter: &Formatter) -> Result<()> {
    if args.k == 0 {
        return Err(CliError::InvalidInput("-k must be at least 1".into()));
    }
    let direction: Direction = args.direction.into();

    let session = Session::new(settings, &args.data)?;
    let store = session.open_store()?;
    let (engine, _) = session.restored_engine(&store, args.checkpoint.as_deref(), &args.applied)?;

    let count = engine.counts().of(direction.query_type());
    if args.query >= count {
        return Err(CliError::InvalidInput(format!(
            "{} {} does not exist ({} known)",
            direction.query_type(),
            args.query,
            count
        )));
    }

    let evaluator = RankingEvaluator::new(
        &InteractionTables::default(),
        engine.tables(),
        settings.trainer.eval_batch_size,
    );
    let ranked = evaluator.recommend(&engine.embed()?, direction, args.query, args.k)?;
    println!(
        "{}",
        formatter.format_recommendations(direction, args.query, &ranked)?
    );
    Ok(())
}
