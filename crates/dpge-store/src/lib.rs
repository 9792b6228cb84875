//! DPGE Storage Layer
//!
//! Owns everything the engine trains or persists:
//!
//! - [`EmbeddingStore`]: the four role-partitioned embedding tables as
//!   trainable variables, versioned so growth is detectable
//! - [`TextCache`]: append-only per-node sentence vectors from a pretrained
//!   encoder
//! - [`CheckpointStore`]: SQLite persistence for checkpoints and cached text
//!
//! # Examples
//!
//! ```no_run
//! use dpge_store::CheckpointStore;
//!
//! let store = CheckpointStore::new("checkpoints.db").unwrap();
//! for info in store.list().unwrap() {
//!     println!("{} epoch {} score {:.4}", info.id, info.epoch, info.score);
//! }
//! ```

#![warn(missing_docs)]

mod checkpoint;
mod embedding;
mod encoder;
mod error;
mod init;
mod text;

pub use checkpoint::{config_hash, Checkpoint, CheckpointInfo, CheckpointStore, NamedTensor};
pub use embedding::{EmbeddingStore, StoreSnapshot};
pub use encoder::{EncoderError, HashSentenceEncoder};
pub use error::{Result, StoreError};
pub use init::{seeded_rng, Initializer, SeededRng};
pub use text::{split_sentences, PaddedText, TextCache};
