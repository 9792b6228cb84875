//! Inspect command implementation.

use crate::cli::InspectArgs;
use crate::config::Settings;
use crate::data::DatasetDir;
use crate::error::Result;
use crate::output::Formatter;
use dpge_domain::traits::InteractionSource;
use dpge_graph::GraphBuilder;
use dpge_store::{CheckpointStore, TextCache};

/// Execute the inspect command.
///
/// Builds the propagation graph without any model, so it is cheap enough to
/// sanity-check a dataset before training.
pub fn execute_inspect(args: InspectArgs, settings: &Settings, formatter: &Formatter) -> Result<()> {
    let dataset = DatasetDir::open(&args.data)?;
    let tables = dataset.train()?;
    let counts = dataset.counts_hint()?;
    let graph = GraphBuilder::new(counts).build(&tables)?;

    let text = if dataset.has_text() {
        let mut cache = TextCache::new(settings.model.text.sentence_dim, counts);
        dataset.encode_text(&mut cache)?;
        Some(cache)
    } else {
        None
    };

    let checkpoints = match &args.db {
        Some(db) => Some(CheckpointStore::new(db)?.list()?),
        None => None,
    };

    println!(
        "{}",
        formatter.format_inspect(graph.stats(), text.as_ref(), checkpoints.as_deref())?
    );
    Ok(())
}
