//! Error types for the CLI application.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed dataset file
    #[error("{}:{line}: {message}", path.display())]
    Data {
        /// File being read
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What was wrong with the line
        message: String,
    },

    /// Training, evaluation or update failure
    #[error("Trainer error: {0}")]
    Trainer(#[from] dpge_trainer::TrainerError),

    /// Checkpoint or embedding store failure
    #[error("Store error: {0}")]
    Store(#[from] dpge_store::StoreError),

    /// Model construction or inference failure
    #[error("Model error: {0}")]
    Model(#[from] dpge_model::ModelError),

    /// Graph construction failure
    #[error("Graph error: {0}")]
    Graph(#[from] dpge_graph::GraphError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No checkpoint to load
    #[error("No checkpoint found in {}. Run 'dpge train' first.", .0.display())]
    NoCheckpoint(PathBuf),
}
