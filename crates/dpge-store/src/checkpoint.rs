//! Checkpoint capture and SQLite persistence
//!
//! A checkpoint holds the four embedding tables, optional text-encoder
//! parameters, and the node counts they cover. Tensors are stored as
//! little-endian `f32` blobs next to their shape.

use crate::{EmbeddingStore, Result, StoreError, TextCache};
use candle_core::{Device, Tensor};
use dpge_domain::{Block, Direction, NodeCounts, NodeType};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash of the hyperparameters a checkpoint is only valid for
///
/// FNV-1a over `"dim={dim};layers={n_layers}"`.
pub fn config_hash(dim: usize, n_layers: usize) -> u64 {
    format!("dim={};layers={}", dim, n_layers)
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

/// A named, row-major `f32` matrix detached from any device
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    /// Table or parameter name
    pub name: String,
    /// Row count
    pub rows: usize,
    /// Column count
    pub cols: usize,
    /// Row-major values
    pub data: Vec<f32>,
}

impl NamedTensor {
    /// Copy a 1-d or 2-d tensor out of the engine
    pub fn from_tensor(name: &str, tensor: &Tensor) -> Result<Self> {
        let (rows, cols) = match tensor.dims() {
            [n] => (1, *n),
            [r, c] => (*r, *c),
            dims => {
                return Err(StoreError::InvalidData(format!(
                    "tensor {} has unsupported shape {:?}",
                    name, dims
                )))
            }
        };
        let data = tensor.flatten_all()?.to_vec1::<f32>()?;
        Ok(Self {
            name: name.to_string(),
            rows,
            cols,
            data,
        })
    }

    /// Rebuild a `[rows, cols]` tensor on `device`
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.data, (self.rows, self.cols), device)?)
    }

    fn to_blob(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn from_blob(name: String, rows: usize, cols: usize, blob: &[u8]) -> Result<Self> {
        if blob.len() != rows * cols * 4 {
            return Err(StoreError::InvalidData(format!(
                "tensor {} blob has {} bytes, expected {}",
                name,
                blob.len(),
                rows * cols * 4
            )));
        }
        let data = blob
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            name,
            rows,
            cols,
            data,
        })
    }
}

/// Snapshot of all trainable state
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Unique, time-ordered id
    pub id: Uuid,
    /// Seconds since the Unix epoch
    pub created_at: u64,
    /// Hash of `(dim, n_layers)` the checkpoint is valid for
    pub config_hash: u64,
    /// Model identifier from the registry
    pub model: String,
    /// Node counts covered by the tables
    pub counts: NodeCounts,
    /// Embedding dimensionality
    pub dim: usize,
    /// Propagation depth
    pub n_layers: usize,
    /// Epoch that produced the checkpoint
    pub epoch: usize,
    /// Direction trained in that epoch
    pub direction: Direction,
    /// Bilateral selection score
    pub score: f64,
    /// Free-form metadata (evaluation report, trainer settings)
    pub metadata: serde_json::Value,
    /// The four embedding tables, named by block
    pub tables: Vec<NamedTensor>,
    /// Text-encoder parameters, empty when text fusion is off
    pub text_params: Vec<NamedTensor>,
}

impl Checkpoint {
    /// Capture the current tables of `store`
    pub fn capture(store: &EmbeddingStore, model: &str, n_layers: usize) -> Result<Self> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            id: Uuid::now_v7(),
            created_at,
            config_hash: config_hash(store.dim(), n_layers),
            model: model.to_string(),
            counts: store.counts(),
            dim: store.dim(),
            n_layers,
            epoch: 0,
            direction: Direction::UserToItem,
            score: 0.0,
            metadata: serde_json::Value::Null,
            tables: store.export_tables()?,
            text_params: Vec::new(),
        })
    }

    /// Record which epoch and score produced this checkpoint
    pub fn with_epoch(mut self, epoch: usize, direction: Direction, score: f64) -> Self {
        self.epoch = epoch;
        self.direction = direction;
        self.score = score;
        self
    }

    /// Attach text-encoder parameters
    pub fn with_text_params(mut self, params: Vec<NamedTensor>) -> Self {
        self.text_params = params;
        self
    }

    /// Attach free-form metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Table of one block
    pub fn table(&self, block: Block) -> Option<&NamedTensor> {
        self.tables.iter().find(|t| t.name == block.as_str())
    }

    /// Text-encoder parameter by name
    pub fn text_param(&self, name: &str) -> Option<&NamedTensor> {
        self.text_params.iter().find(|t| t.name == name)
    }

    /// True when the checkpoint carries text-fusion weights
    pub fn has_text_weights(&self) -> bool {
        !self.text_params.is_empty()
    }

    /// Fail fast when this checkpoint cannot be loaded into the current run
    pub fn ensure_compatible(&self, expected_hash: u64, text_enabled: bool) -> Result<()> {
        if self.config_hash != expected_hash {
            return Err(StoreError::ConfigMismatch {
                expected: expected_hash,
                found: self.config_hash,
            });
        }
        if self.has_text_weights() && !text_enabled {
            return Err(StoreError::TextWeightsWithoutEncoder);
        }
        Ok(())
    }

    /// Summary without tensor data
    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            id: self.id,
            created_at: self.created_at,
            model: self.model.clone(),
            users: self.counts.users,
            items: self.counts.items,
            dim: self.dim,
            n_layers: self.n_layers,
            epoch: self.epoch,
            direction: self.direction.as_str().to_string(),
            score: self.score,
        }
    }
}

/// Checkpoint listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointInfo {
    /// Checkpoint id
    pub id: Uuid,
    /// Seconds since the Unix epoch
    pub created_at: u64,
    /// Model identifier
    pub model: String,
    /// Users covered
    pub users: usize,
    /// Items covered
    pub items: usize,
    /// Embedding dimensionality
    pub dim: usize,
    /// Propagation depth
    pub n_layers: usize,
    /// Epoch that produced it
    pub epoch: usize,
    /// Direction trained in that epoch
    pub direction: String,
    /// Bilateral selection score
    pub score: f64,
}

/// SQLite-backed checkpoint storage
///
/// Use `:memory:` for an in-memory database (useful for testing).
///
/// # Thread Safety
///
/// SQLite connections are not thread-safe. The trainer owns its
/// `CheckpointStore` exclusively.
pub struct CheckpointStore {
    conn: Connection,
}

const INFO_COLUMNS: &str =
    "id, created_at, config_hash, model, users, items, dim, n_layers, epoch, direction, score, metadata";

impl CheckpointStore {
    /// Open (or create) a checkpoint database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    fn uuid_from_bytes(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| StoreError::InvalidData(format!("bad checkpoint id: {}", e)))
    }

    /// Persist a checkpoint with all its tensors in one transaction
    pub fn save(&mut self, checkpoint: &Checkpoint) -> Result<Uuid> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO checkpoints (id, created_at, config_hash, model, users, items, dim, n_layers, epoch, direction, score, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                checkpoint.id.as_bytes().to_vec(),
                checkpoint.created_at as i64,
                checkpoint.config_hash as i64,
                &checkpoint.model,
                checkpoint.counts.users as i64,
                checkpoint.counts.items as i64,
                checkpoint.dim as i64,
                checkpoint.n_layers as i64,
                checkpoint.epoch as i64,
                checkpoint.direction.as_str(),
                checkpoint.score,
                serde_json::to_string(&checkpoint.metadata)?,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO checkpoint_tensors (checkpoint_id, name, kind, rows, cols, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let tensors = checkpoint
                .tables
                .iter()
                .map(|t| ("table", t))
                .chain(checkpoint.text_params.iter().map(|t| ("text", t)));
            for (kind, tensor) in tensors {
                stmt.execute(params![
                    checkpoint.id.as_bytes().to_vec(),
                    &tensor.name,
                    kind,
                    tensor.rows as i64,
                    tensor.cols as i64,
                    tensor.to_blob(),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            "Saved checkpoint {} (epoch {}, score {:.4}, {})",
            checkpoint.id,
            checkpoint.epoch,
            checkpoint.score,
            checkpoint.counts
        );
        Ok(checkpoint.id)
    }

    /// Load a checkpoint by id
    pub fn load(&self, id: Uuid) -> Result<Checkpoint> {
        let sql = format!("SELECT {} FROM checkpoints WHERE id = ?1", INFO_COLUMNS);
        let header = self
            .conn
            .query_row(&sql, params![id.as_bytes().to_vec()], Self::read_header)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.assemble(header)
    }

    /// Most recently created checkpoint, if any
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints ORDER BY created_at DESC, id DESC LIMIT 1",
            INFO_COLUMNS
        );
        let header = self.conn.query_row(&sql, [], Self::read_header).optional()?;
        header.map(|h| self.assemble(h)).transpose()
    }

    /// All checkpoints, newest first, without tensor data
    pub fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let sql = format!(
            "SELECT {} FROM checkpoints ORDER BY created_at DESC, id DESC",
            INFO_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let headers = stmt
            .query_map([], Self::read_header)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        headers
            .into_iter()
            .map(|h| Ok(h.into_checkpoint(Vec::new(), Vec::new())?.info()))
            .collect()
    }

    fn read_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<Header> {
        Ok(Header {
            id: row.get(0)?,
            created_at: row.get(1)?,
            config_hash: row.get(2)?,
            model: row.get(3)?,
            users: row.get(4)?,
            items: row.get(5)?,
            dim: row.get(6)?,
            n_layers: row.get(7)?,
            epoch: row.get(8)?,
            direction: row.get(9)?,
            score: row.get(10)?,
            metadata: row.get(11)?,
        })
    }

    fn assemble(&self, header: Header) -> Result<Checkpoint> {
        let mut stmt = self.conn.prepare(
            "SELECT name, kind, rows, cols, data FROM checkpoint_tensors
             WHERE checkpoint_id = ?1 ORDER BY kind, name",
        )?;
        let rows = stmt
            .query_map(params![&header.id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tables = Vec::new();
        let mut text_params = Vec::new();
        for (name, kind, r, c, blob) in rows {
            let tensor = NamedTensor::from_blob(name, r as usize, c as usize, &blob)?;
            match kind.as_str() {
                "table" => tables.push(tensor),
                "text" => text_params.push(tensor),
                other => {
                    return Err(StoreError::InvalidData(format!(
                        "unknown tensor kind: {}",
                        other
                    )))
                }
            }
        }
        header.into_checkpoint(tables, text_params)
    }

    /// Persist sentence vectors; rows already stored are never overwritten
    pub fn save_text(&mut self, cache: &TextCache) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO sentence_vectors (node_type, node_index, position, vector)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for node_type in [NodeType::User, NodeType::Item] {
                let count = match node_type {
                    NodeType::User => cache.counts().users,
                    NodeType::Item => cache.counts().items,
                };
                for index in 0..count {
                    for (position, vector) in cache.sentences(node_type, index).iter().enumerate() {
                        let blob: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
                        inserted += stmt.execute(params![
                            node_type.as_str(),
                            index as i64,
                            position as i64,
                            blob
                        ])?;
                    }
                }
            }
        }
        tx.commit()?;
        tracing::debug!("Stored {} new sentence vectors", inserted);
        Ok(inserted)
    }

    /// Load sentence vectors into a cache sized for `counts`
    pub fn load_text(&self, dim: usize, counts: NodeCounts) -> Result<TextCache> {
        let mut stmt = self.conn.prepare(
            "SELECT node_type, node_index, vector FROM sentence_vectors
             ORDER BY node_type, node_index, position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut grouped: Vec<(NodeType, usize, Vec<Vec<f32>>)> = Vec::new();
        for (node_type, index, blob) in rows {
            let node_type: NodeType = node_type
                .parse()
                .map_err(|e: String| StoreError::InvalidData(e))?;
            let vector = NamedTensor::from_blob(String::new(), 1, dim, &blob)?.data;
            match grouped.last_mut() {
                Some((t, i, v)) if *t == node_type && *i == index as usize => v.push(vector),
                _ => grouped.push((node_type, index as usize, vec![vector])),
            }
        }

        let mut cache = TextCache::new(dim, counts);
        for (node_type, index, vectors) in grouped {
            cache.set_if_absent(node_type, index, vectors)?;
        }
        Ok(cache)
    }
}

struct Header {
    id: Vec<u8>,
    created_at: i64,
    config_hash: i64,
    model: String,
    users: i64,
    items: i64,
    dim: i64,
    n_layers: i64,
    epoch: i64,
    direction: String,
    score: f64,
    metadata: String,
}

impl Header {
    fn into_checkpoint(
        self,
        tables: Vec<NamedTensor>,
        text_params: Vec<NamedTensor>,
    ) -> Result<Checkpoint> {
        let direction = self
            .direction
            .parse::<Direction>()
            .map_err(|e: String| StoreError::InvalidData(e))?;
        Ok(Checkpoint {
            id: CheckpointStore::uuid_from_bytes(&self.id)?,
            created_at: self.created_at as u64,
            config_hash: self.config_hash as u64,
            model: self.model,
            counts: NodeCounts::new(self.users as usize, self.items as usize),
            dim: self.dim as usize,
            n_layers: self.n_layers as usize,
            epoch: self.epoch as usize,
            direction,
            score: self.score,
            metadata: serde_json::from_str(&self.metadata)?,
            tables,
            text_params,
        })
    }
}
