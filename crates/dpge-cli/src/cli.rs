//! CLI command definitions and argument parsing.

use clap::{Parser, Subcommand};
use dpge_domain::Direction;
use std::path::PathBuf;

/// DPGE - Train and query dual-perspective graph embeddings.
#[derive(Debug, Parser)]
#[command(name = "dpge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<CliFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Settings file path
    #[arg(short, long, global = true, env = "DPGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliFormat {
    /// Table format (default)
    Table,
    /// JSON format
    Json,
    /// Quiet format (ids and scores only)
    Quiet,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train a model on a dataset directory
    Train(TrainArgs),

    /// Fold new nodes and interactions into the latest checkpoint
    Update(UpdateArgs),

    /// Rank held-out interactions with a stored checkpoint
    Evaluate(EvaluateArgs),

    /// Top-k candidates for one query node
    Recommend(RecommendArgs),

    /// Graph statistics and stored checkpoints
    Inspect(InspectArgs),
}

/// Dataset and checkpoint location shared by most commands.
#[derive(Debug, Clone, clap::Args)]
pub struct DataArgs {
    /// Dataset directory (success.txt, user_only.txt, item_only.txt, ...)
    #[arg(short, long)]
    pub data: PathBuf,

    /// Checkpoint database (defaults to [data].db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Registered model identifier (defaults to [data].model)
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Arguments for the train command.
#[derive(Debug, Parser)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Replace [trainer] with a named preset
    #[arg(long, value_enum)]
    pub preset: Option<PresetArg>,

    /// Override the epoch budget
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override the random seed for sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Score the test split with the selected checkpoint
    #[arg(long)]
    pub test: bool,
}

/// Arguments for the update command.
#[derive(Debug, Parser)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Delta directory in the same layout as the dataset
    #[arg(long)]
    pub delta: PathBuf,

    /// Deltas applied earlier, replayed before this one
    #[arg(long = "applied")]
    pub applied: Vec<PathBuf>,

    /// Epochs of resumed training (0 grows the graph only)
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Checkpoint to grow (defaults to the latest)
    #[arg(long)]
    pub checkpoint: Option<String>,
}

/// Arguments for the evaluate command.
#[derive(Debug, Parser)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Checkpoint id (defaults to the latest)
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Deltas applied since training
    #[arg(long = "applied")]
    pub applied: Vec<PathBuf>,

    /// Held-out split to rank
    #[arg(short, long, value_enum, default_value = "valid")]
    pub split: SplitArg,
}

/// Arguments for the recommend command.
#[derive(Debug, Parser)]
pub struct RecommendArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Which population queries
    #[arg(long, value_enum, default_value = "user-item")]
    pub direction: DirectionArg,

    /// Index of the querying node
    #[arg(short, long)]
    pub query: usize,

    /// Number of candidates
    #[arg(short, default_value = "10")]
    pub k: usize,

    /// Checkpoint id (defaults to the latest)
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Deltas applied since training
    #[arg(long = "applied")]
    pub applied: Vec<PathBuf>,
}

/// Arguments for the inspect command.
#[derive(Debug, Parser)]
pub struct InspectArgs {
    /// Dataset directory
    #[arg(short, long)]
    pub data: PathBuf,

    /// Also list checkpoints stored in this database
    #[arg(long)]
    pub db: Option<PathBuf>,
}

/// Trainer presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PresetArg {
    /// Balanced defaults
    Default,
    /// Short runs for smoke tests
    Fast,
    /// Long runs with generous patience
    Thorough,
}

/// Held-out splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SplitArg {
    /// valid.txt
    Valid,
    /// test.txt
    Test,
}

/// Query direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DirectionArg {
    /// Users query, items are ranked
    #[value(name = "user-item")]
    UserItem,
    /// Items query, users are ranked
    #[value(name = "item-user")]
    ItemUser,
}

impl From<CliFormat> for crate::config::OutputFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Table => crate::config::OutputFormat::Table,
            CliFormat::Json => crate::config::OutputFormat::Json,
            CliFormat::Quiet => crate::config::OutputFormat::Quiet,
        }
    }
}

impl From<DirectionArg> for Direction {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::UserItem => Direction::UserToItem,
            DirectionArg::ItemUser => Direction::ItemToUser,
        }
    }
}

impl From<PresetArg> for dpge_trainer::TrainerConfig {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Default => dpge_trainer::TrainerConfig::default(),
            PresetArg::Fast => dpge_trainer::TrainerConfig::fast(),
            PresetArg::Thorough => dpge_trainer::TrainerConfig::thorough(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_command() {
        let cli = Cli::parse_from(["dpge", "train", "--data", "toy", "--model", "dpge-text"]);
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.data.data, PathBuf::from("toy"));
                assert_eq!(args.data.model.as_deref(), Some("dpge-text"));
                assert!(args.data.db.is_none());
                assert!(args.preset.is_none());
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_direction_conversion() {
        let direction: Direction = DirectionArg::ItemUser.into();
        assert_eq!(direction, Direction::ItemToUser);
    }

    #[test]
    fn test_preset_conversion() {
        let config: dpge_trainer::TrainerConfig = PresetArg::Fast.into();
        assert_eq!(config, dpge_trainer::TrainerConfig::fast());
    }
}
