//! Error types for graph construction

use dpge_domain::NodeType;
use thiserror::Error;

/// Errors that can occur while building the propagation graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An interaction references a node beyond the declared counts
    #[error("{node_type} index {index} out of range (count: {count})")]
    IndexOutOfRange {
        /// Population of the offending index
        node_type: NodeType,
        /// The offending index
        index: usize,
        /// Declared node count for that population
        count: usize,
    },

    /// The graph does not fit 32-bit flat ids
    #[error("Graph too large: {0} node-role copies")]
    TooLarge(usize),
}
