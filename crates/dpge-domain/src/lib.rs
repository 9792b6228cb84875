//! DPGE Domain Layer
//!
//! Core vocabulary of the Dual-Perspective Graph Embedding engine. Like every
//! domain crate in this workspace it has ZERO external dependencies and only
//! defines value types and the trait seams other layers implement.
//!
//! ## Key Concepts
//!
//! - **Node types**: the two populations being matched (users and items)
//! - **Roles**: every node exists as an *active* copy (the initiator) and a
//!   *passive* copy (the one being evaluated)
//! - **Blocks**: the four contiguous index ranges of node-role copies in the
//!   propagation graph
//! - **Interactions**: append-only `(user, item, kind)` records, where the kind
//!   says whether both sides accepted or only one did
//! - **Direction**: which population queries and which is ranked
//!
//! ## Architecture
//!
//! - No external crate dependencies
//! - Collaborators (interaction sources, pretrained sentence encoders) are
//!   expressed as traits in [`traits`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod direction;
pub mod interaction;
pub mod node;
pub mod traits;

// Re-exports for convenience
pub use direction::Direction;
pub use interaction::{Interaction, InteractionKind, InteractionTables};
pub use node::{Block, NodeCounts, NodeType, Role};
