//! Trait definitions for external collaborators
//!
//! These traits define the boundaries between the engine and the systems that
//! feed it. Implementations live in other crates.

use crate::{InteractionTables, NodeType};

/// Source of interaction tables
///
/// The storage format (files, database) is the implementor's concern.
pub trait InteractionSource {
    /// Error type for loading operations
    type Error;

    /// Interactions used to build the graph and train
    fn train(&self) -> Result<InteractionTables, Self::Error>;

    /// Held-out interactions used for early stopping, if any
    fn validation(&self) -> Result<Option<InteractionTables>, Self::Error>;

    /// Held-out interactions used for the final report, if any
    fn test(&self) -> Result<Option<InteractionTables>, Self::Error>;

    /// Raw text spans describing nodes of one population, as `(index, text)`
    fn node_text(&self, node_type: NodeType) -> Result<Vec<(usize, String)>, Self::Error>;
}

/// Pretrained text encoder
///
/// Maps a text span to a fixed-size vector. The engine caches the output per
/// node and never calls the encoder during training.
pub trait SentenceEncoder {
    /// Error type for encoding operations
    type Error;

    /// Encode one text span
    fn encode(&self, text: &str) -> Result<Vec<f32>, Self::Error>;

    /// Dimensionality of the produced vectors
    fn dimension(&self) -> usize;
}
