//! DPGE Graph Layer
//!
//! Turns the three interaction tables into a single undirected,
//! role-partitioned propagation graph with symmetric degree-normalized
//! edge weights.
//!
//! # Layout
//!
//! Every user and item is materialized twice, once per [`Role`](dpge_domain::Role).
//! Copies live in an arena of flat ids split into four contiguous
//! [`Block`](dpge_domain::Block)s. Edges are stored as parallel
//! `src`/`dst`/`weight` arrays sorted by source, with CSR offsets for
//! neighbor lookup. There are no object graphs or back-pointers, so growing
//! the graph is a rebuild over plain arrays.
//!
//! # Edge rules
//!
//! | Interaction | Directed edges emitted |
//! |-------------|------------------------|
//! | success `(u, i)` | `ua(u) <-> ip(i)` and `up(u) <-> ia(i)` |
//! | user-only `(u, i)` | `ua(u) <-> ip(i)` |
//! | item-only `(u, i)` | `ia(i) <-> up(u)` |
//! | every node `n` | `active(n) <-> passive(n)` (self-consistency) |
//!
//! # Usage
//!
//! ```
//! use dpge_domain::{Block, InteractionTables, NodeCounts};
//! use dpge_graph::GraphBuilder;
//!
//! let tables = InteractionTables::new(vec![(0, 0), (1, 1)], vec![(2, 2)], vec![]);
//! let graph = GraphBuilder::new(NodeCounts::new(3, 3)).build(&tables).unwrap();
//!
//! let ua0 = graph.flat_id(Block::UserActive, 0);
//! let ip0 = graph.flat_id(Block::ItemPassive, 0);
//! assert_eq!(graph.weight(ua0, ip0), graph.weight(ip0, ua0));
//! ```

#![warn(missing_docs)]

mod builder;
mod error;
mod graph;

pub use builder::GraphBuilder;
pub use error::GraphError;
pub use graph::{GraphStats, PropagationGraph};
