//! Embedding Store
//!
//! Owns the four role-partitioned embedding tables as trainable tensor
//! variables. The store is versioned: every growth produces a new value with a
//! higher version, and consumers that captured a [`StoreSnapshot`] detect
//! staleness through [`EmbeddingStore::check`] instead of silently indexing
//! into a table whose shape changed under them.
//!
//! # Examples
//!
//! ```rust
//! use candle_core::Device;
//! use dpge_domain::{Block, NodeCounts};
//! use dpge_store::{seeded_rng, EmbeddingStore, Initializer};
//!
//! let mut rng = seeded_rng(42);
//! let store = EmbeddingStore::new(
//!     NodeCounts::new(3, 3), 8, &Initializer::default(), &mut rng, &Device::Cpu,
//! ).unwrap();
//!
//! let grown = store.grown(NodeCounts::new(4, 3), &Initializer::default(), &mut rng).unwrap();
//! assert_eq!(grown.rows(Block::UserActive).unwrap().len(), 4);
//! assert!(store.check(&grown.snapshot()).is_err());
//! ```

use crate::checkpoint::{Checkpoint, NamedTensor};
use crate::{Initializer, Result, StoreError};
use candle_core::{Device, Tensor, Var};
use dpge_domain::{Block, NodeCounts};
use rand::Rng;

/// Node counts captured together with the store version they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Store version at capture time
    pub version: u64,

    /// Node counts at capture time
    pub counts: NodeCounts,
}

/// The four embedding tables of the engine
pub struct EmbeddingStore {
    dim: usize,
    counts: NodeCounts,
    version: u64,
    tables: [Var; 4],
    device: Device,
}

impl EmbeddingStore {
    /// Create a store with every row freshly initialized
    pub fn new<R: Rng + ?Sized>(
        counts: NodeCounts,
        dim: usize,
        init: &Initializer,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(StoreError::InvalidData("embedding dimension must be > 0".into()));
        }
        init.validate()?;

        let mut make = |block: Block| -> Result<Var> {
            let t = init.tensor(block.len(counts), dim, &mut *rng, device)?;
            Ok(Var::from_tensor(&t)?)
        };
        let tables = [
            make(Block::UserActive)?,
            make(Block::ItemPassive)?,
            make(Block::UserPassive)?,
            make(Block::ItemActive)?,
        ];

        Ok(Self {
            dim,
            counts,
            version: 0,
            tables,
            device: device.clone(),
        })
    }

    /// Embedding dimensionality
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Current node counts
    pub fn counts(&self) -> NodeCounts {
        self.counts
    }

    /// Current version (incremented on every growth)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Device the tables live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn slot(block: Block) -> usize {
        match block {
            Block::UserActive => 0,
            Block::ItemPassive => 1,
            Block::UserPassive => 2,
            Block::ItemActive => 3,
        }
    }

    /// Trainable variable of one table
    pub fn var(&self, block: Block) -> &Var {
        &self.tables[Self::slot(block)]
    }

    /// Current values of one table as a `[n, dim]` tensor
    pub fn tensor(&self, block: Block) -> &Tensor {
        self.var(block).as_tensor()
    }

    /// Handles to all four tables (sharing storage with the store)
    pub fn vars(&self) -> Vec<Var> {
        self.tables.to_vec()
    }

    /// Capture the current version and counts
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.version,
            counts: self.counts,
        }
    }

    /// Fail with a retryable error when `snapshot` predates this store
    pub fn check(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if snapshot.version != self.version || snapshot.counts != self.counts {
            return Err(StoreError::StaleSnapshot {
                snapshot: snapshot.version,
                current: self.version,
            });
        }
        Ok(())
    }

    /// Gather rows of one table
    pub fn lookup(&self, block: Block, indices: &[usize]) -> Result<Tensor> {
        let count = block.len(self.counts);
        let mut ids = Vec::with_capacity(indices.len());
        for &index in indices {
            if index >= count {
                return Err(StoreError::IndexOutOfRange {
                    node_type: block.node_type(),
                    index,
                    count,
                });
            }
            ids.push(index as u32);
        }
        let ids = Tensor::from_vec(ids, indices.len(), &self.device)?;
        Ok(self.tensor(block).index_select(&ids, 0)?)
    }

    /// Copy one table out as rows
    pub fn rows(&self, block: Block) -> Result<Vec<Vec<f32>>> {
        Ok(self.tensor(block).to_vec2::<f32>()?)
    }

    /// Return a grown copy of this store
    ///
    /// Existing rows are copied verbatim and only the appended rows are drawn
    /// from `init`. The receiver is untouched, so a failure leaves nothing
    /// half-grown. Growing to the same counts returns an identical store with
    /// an unchanged version.
    pub fn grown<R: Rng + ?Sized>(
        &self,
        counts: NodeCounts,
        init: &Initializer,
        rng: &mut R,
    ) -> Result<Self> {
        if !self.counts.fits_within(counts) {
            return Err(StoreError::InvalidData(format!(
                "cannot shrink store from {} to {}",
                self.counts, counts
            )));
        }

        let mut tables = Vec::with_capacity(4);
        for block in Block::ALL {
            let old = block.len(self.counts);
            let new = block.len(counts);
            let current = self.tensor(block).detach();
            let value = if new > old {
                let fresh = init.tensor(new - old, self.dim, &mut *rng, &self.device)?;
                if old == 0 {
                    fresh
                } else {
                    Tensor::cat(&[&current, &fresh], 0)?
                }
            } else {
                current.copy()?
            };
            tables.push(Var::from_tensor(&value)?);
        }

        let version = if counts == self.counts {
            self.version
        } else {
            self.version + 1
        };
        let [ua, ip, up, ia]: [Var; 4] = tables
            .try_into()
            .map_err(|_| StoreError::InvalidData("expected four tables".into()))?;

        if version != self.version {
            tracing::info!(
                "Embedding store grown from {} to {} (version {})",
                self.counts,
                counts,
                version
            );
        }

        Ok(Self {
            dim: self.dim,
            counts,
            version,
            tables: [ua, ip, up, ia],
            device: self.device.clone(),
        })
    }

    /// Export the four tables for a checkpoint
    pub fn export_tables(&self) -> Result<Vec<NamedTensor>> {
        Block::ALL
            .into_iter()
            .map(|block| NamedTensor::from_tensor(block.as_str(), self.tensor(block)))
            .collect()
    }

    /// Load checkpoint rows into this store
    ///
    /// The checkpoint may cover fewer nodes than the store; rows beyond the
    /// checkpoint keep their current (freshly initialized) values.
    pub fn restore(&mut self, checkpoint: &Checkpoint, expected_hash: u64) -> Result<()> {
        if checkpoint.config_hash != expected_hash {
            return Err(StoreError::ConfigMismatch {
                expected: expected_hash,
                found: checkpoint.config_hash,
            });
        }
        if checkpoint.dim != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                found: checkpoint.dim,
            });
        }
        if !checkpoint.counts.fits_within(self.counts) {
            return Err(StoreError::CheckpointTooLarge {
                checkpoint: checkpoint.counts,
                current: self.counts,
            });
        }

        // Build every replacement before touching any table.
        let mut replacements = Vec::with_capacity(4);
        for block in Block::ALL {
            let saved = checkpoint.table(block).ok_or_else(|| {
                StoreError::InvalidData(format!("checkpoint lacks table {}", block))
            })?;
            let saved_rows = block.len(checkpoint.counts);
            if saved.rows != saved_rows || saved.cols != self.dim {
                return Err(StoreError::InvalidData(format!(
                    "table {} has shape [{}, {}], expected [{}, {}]",
                    block, saved.rows, saved.cols, saved_rows, self.dim
                )));
            }
            if saved_rows == 0 {
                continue;
            }
            let total = block.len(self.counts);
            let current = self.tensor(block).detach();
            let value = if saved_rows == total {
                saved.to_tensor(&self.device)?
            } else {
                let tail = current.narrow(0, saved_rows, total - saved_rows)?;
                Tensor::cat(&[&saved.to_tensor(&self.device)?, &tail], 0)?
            };
            replacements.push((block, value));
        }
        for (block, value) in replacements {
            self.var(block).set(&value)?;
        }

        tracing::info!(
            "Restored checkpoint {} ({}) into store with {}",
            checkpoint.id,
            checkpoint.counts,
            self.counts
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded_rng;

    fn store(users: usize, items: usize) -> EmbeddingStore {
        EmbeddingStore::new(
            NodeCounts::new(users, items),
            4,
            &Initializer::default(),
            &mut seeded_rng(11),
            &Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_table_shapes() {
        let s = store(3, 5);
        assert_eq!(s.tensor(Block::UserActive).dims2().unwrap(), (3, 4));
        assert_eq!(s.tensor(Block::ItemPassive).dims2().unwrap(), (5, 4));
        assert_eq!(s.tensor(Block::UserPassive).dims2().unwrap(), (3, 4));
        assert_eq!(s.tensor(Block::ItemActive).dims2().unwrap(), (5, 4));
        assert_eq!(s.vars().len(), 4);
    }

    #[test]
    fn test_active_and_passive_are_distinct() {
        let s = store(3, 3);
        assert_ne!(
            s.rows(Block::UserActive).unwrap(),
            s.rows(Block::UserPassive).unwrap()
        );
    }

    #[test]
    fn test_grow_keeps_existing_rows() {
        let s = store(3, 3);
        let before = s.rows(Block::UserPassive).unwrap();
        let grown = s
            .grown(NodeCounts::new(4, 3), &Initializer::default(), &mut seeded_rng(99))
            .unwrap();
        let after = grown.rows(Block::UserPassive).unwrap();

        assert_eq!(after.len(), 4);
        for (old, new) in before.iter().zip(&after) {
            let old_bits: Vec<u32> = old.iter().map(|v| v.to_bits()).collect();
            let new_bits: Vec<u32> = new.iter().map(|v| v.to_bits()).collect();
            assert_eq!(old_bits, new_bits);
        }
        assert!(after[3].iter().any(|v| *v != 0.0));
        assert_eq!(grown.version(), s.version() + 1);
    }

    #[test]
    fn test_grow_to_same_counts_is_identity() {
        let s = store(2, 2);
        let same = s
            .grown(NodeCounts::new(2, 2), &Initializer::default(), &mut seeded_rng(5))
            .unwrap();
        assert_eq!(same.version(), s.version());
        for block in Block::ALL {
            assert_eq!(same.rows(block).unwrap(), s.rows(block).unwrap());
        }
    }

    #[test]
    fn test_cannot_shrink() {
        let s = store(3, 3);
        assert!(s
            .grown(NodeCounts::new(2, 3), &Initializer::default(), &mut seeded_rng(5))
            .is_err());
    }

    #[test]
    fn test_snapshot_staleness() {
        let s = store(2, 2);
        let snap = s.snapshot();
        assert!(s.check(&snap).is_ok());

        let grown = s
            .grown(NodeCounts::new(3, 2), &Initializer::default(), &mut seeded_rng(5))
            .unwrap();
        let err = grown.check(&snap).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_lookup() {
        let s = store(3, 3);
        let rows = s.lookup(Block::ItemActive, &[2, 0]).unwrap().to_vec2::<f32>().unwrap();
        let all = s.rows(Block::ItemActive).unwrap();
        assert_eq!(rows, vec![all[2].clone(), all[0].clone()]);
        assert!(s.lookup(Block::ItemActive, &[3]).is_err());
    }
}
