//! Error types for the storage layer

use dpge_domain::{NodeCounts, NodeType};
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Tensor engine error
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Metadata serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Checkpoint was produced with different hyperparameters
    #[error("Config hash mismatch: checkpoint {found:016x}, current run {expected:016x}")]
    ConfigMismatch {
        /// Hash of the current run
        expected: u64,
        /// Hash stored in the checkpoint
        found: u64,
    },

    /// Vector dimensionality differs from what the store holds
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality
        expected: usize,
        /// Found dimensionality
        found: usize,
    },

    /// Checkpoint covers more nodes than the current graph
    #[error("Checkpoint covers {checkpoint}, current graph only {current}")]
    CheckpointTooLarge {
        /// Counts stored in the checkpoint
        checkpoint: NodeCounts,
        /// Counts of the current graph
        current: NodeCounts,
    },

    /// Checkpoint carries text-fusion weights but text is disabled
    #[error("Checkpoint contains text-fusion weights but the text encoder is disabled")]
    TextWeightsWithoutEncoder,

    /// Consumer holds a snapshot from an older store version (retryable)
    #[error("Stale snapshot: taken at version {snapshot}, store is at version {current}")]
    StaleSnapshot {
        /// Version recorded in the snapshot
        snapshot: u64,
        /// Current store version
        current: u64,
    },

    /// Node index outside the store
    #[error("{node_type} index {index} out of range (count: {count})")]
    IndexOutOfRange {
        /// Population
        node_type: NodeType,
        /// Offending index
        index: usize,
        /// Current count
        count: usize,
    },

    /// Invalid initializer parameters
    #[error("Initializer error: {0}")]
    Initializer(String),

    /// Sentence encoder failure
    #[error("Encoder error: {0}")]
    Encoder(String),
}

impl StoreError {
    /// True for conditions the caller may retry after refreshing its view
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StaleSnapshot { .. })
    }
}
