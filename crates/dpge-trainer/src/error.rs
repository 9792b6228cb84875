//! Error types for training, evaluation and incremental updates

use thiserror::Error;

/// Result type alias for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

/// Errors that can occur while training or updating
#[derive(Error, Debug)]
pub enum TrainerError {
    /// Model layer error
    #[error("Model error: {0}")]
    Model(#[from] dpge_model::ModelError),

    /// Storage layer error
    #[error("Store error: {0}")]
    Store(#[from] dpge_store::StoreError),

    /// Graph construction error
    #[error("Graph error: {0}")]
    Graph(#[from] dpge_graph::GraphError),

    /// Tensor engine error
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Report serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Incremental delta failed validation; nothing was committed
    #[error("Invalid delta: {0}")]
    InvalidDelta(String),

    /// No success interactions to sample positives from
    #[error("No training interactions: at least one success pair is required")]
    NoTrainingData,

    /// Prefetch thread failure
    #[error("Sampler error: {0}")]
    Sampler(String),
}
