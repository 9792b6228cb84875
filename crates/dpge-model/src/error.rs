//! Error types for the numeric core

use dpge_domain::NodeCounts;
use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur in the forward pass or model setup
#[derive(Error, Debug)]
pub enum ModelError {
    /// Tensor engine error
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Storage layer error
    #[error("Store error: {0}")]
    Store(#[from] dpge_store::StoreError),

    /// Graph construction error
    #[error("Graph error: {0}")]
    Graph(#[from] dpge_graph::GraphError),

    /// Model identifier not present in the registry
    #[error("Unknown model: {0} (available: {1})")]
    UnknownModel(String, String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Text fusion requested but no text cache supplied
    #[error("Model {0} requires cached text but none was provided")]
    TextRequired(String),

    /// Embedding tables and graph cover different node counts
    #[error("Store covers {store}, graph covers {graph}")]
    CountMismatch {
        /// Counts in the embedding store
        store: NodeCounts,
        /// Counts in the propagation graph
        graph: NodeCounts,
    },

    /// Query index outside its population
    #[error("Query index {index} out of range (count: {count})")]
    QueryOutOfRange {
        /// Offending index
        index: usize,
        /// Population size
        count: usize,
    },
}
