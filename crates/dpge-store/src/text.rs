//! Cached per-node sentence vectors
//!
//! The pretrained encoder runs once per node, before training. Its output is
//! kept here, append-only: growing the cache appends empty rows for new
//! nodes, and text for a node that already has text is never overwritten.

use crate::{Result, StoreError};
use candle_core::{Device, Tensor};
use dpge_domain::traits::SentenceEncoder;
use dpge_domain::{NodeCounts, NodeType};

/// Padded tensor view of one population's sentences
#[derive(Debug, Clone)]
pub struct PaddedText {
    /// Sentence vectors `[n, max_len, sentence_dim]`, zero-padded
    pub sentences: Tensor,

    /// `1.0` for real sentences, `0.0` for padding, `[n, max_len]`
    pub mask: Tensor,

    /// `1.0` for nodes with at least one sentence, `[n]`
    pub present: Tensor,

    /// Padded sentence count (at least 1)
    pub max_len: usize,
}

/// Append-only cache of sentence vectors per node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextCache {
    dim: usize,
    users: Vec<Vec<Vec<f32>>>,
    items: Vec<Vec<Vec<f32>>>,
}

impl TextCache {
    /// Create an empty cache with one (empty) row per node
    pub fn new(dim: usize, counts: NodeCounts) -> Self {
        Self {
            dim,
            users: vec![Vec::new(); counts.users],
            items: vec![Vec::new(); counts.items],
        }
    }

    /// Sentence vector dimensionality
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn rows(&self, node_type: NodeType) -> &Vec<Vec<Vec<f32>>> {
        match node_type {
            NodeType::User => &self.users,
            NodeType::Item => &self.items,
        }
    }

    fn rows_mut(&mut self, node_type: NodeType) -> &mut Vec<Vec<Vec<f32>>> {
        match node_type {
            NodeType::User => &mut self.users,
            NodeType::Item => &mut self.items,
        }
    }

    /// Node counts covered by the cache
    pub fn counts(&self) -> NodeCounts {
        NodeCounts::new(self.users.len(), self.items.len())
    }

    /// Sentences of one node (empty when the node has no text)
    pub fn sentences(&self, node_type: NodeType, index: usize) -> &[Vec<f32>] {
        self.rows(node_type)
            .get(index)
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    /// True when the node has at least one sentence
    pub fn has_text(&self, node_type: NodeType, index: usize) -> bool {
        !self.sentences(node_type, index).is_empty()
    }

    /// Number of nodes of a population that have text
    pub fn nodes_with_text(&self, node_type: NodeType) -> usize {
        self.rows(node_type).iter().filter(|s| !s.is_empty()).count()
    }

    /// True when no node has text
    pub fn is_empty(&self) -> bool {
        self.nodes_with_text(NodeType::User) == 0 && self.nodes_with_text(NodeType::Item) == 0
    }

    /// Append empty rows up to `counts`; never truncates
    pub fn grow_to(&mut self, counts: NodeCounts) {
        if self.users.len() < counts.users {
            self.users.resize(counts.users, Vec::new());
        }
        if self.items.len() < counts.items {
            self.items.resize(counts.items, Vec::new());
        }
    }

    /// Check a batch of sentences before storing it
    pub fn validate(&self, node_type: NodeType, index: usize, sentences: &[Vec<f32>]) -> Result<()> {
        let count = self.rows(node_type).len();
        if index >= count {
            return Err(StoreError::IndexOutOfRange {
                node_type,
                index,
                count,
            });
        }
        if let Some(bad) = sentences.iter().find(|s| s.len() != self.dim) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                found: bad.len(),
            });
        }
        Ok(())
    }

    /// Append a new node with its sentences; returns the node's index
    pub fn append(&mut self, node_type: NodeType, sentences: Vec<Vec<f32>>) -> Result<usize> {
        if let Some(bad) = sentences.iter().find(|s| s.len() != self.dim) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                found: bad.len(),
            });
        }
        let rows = self.rows_mut(node_type);
        rows.push(sentences);
        Ok(rows.len() - 1)
    }

    /// Store sentences for a node that has none yet
    ///
    /// Returns `Ok(false)` and leaves the row untouched when the node already
    /// has text.
    pub fn set_if_absent(
        &mut self,
        node_type: NodeType,
        index: usize,
        sentences: Vec<Vec<f32>>,
    ) -> Result<bool> {
        self.validate(node_type, index, &sentences)?;
        let row = &mut self.rows_mut(node_type)[index];
        if !row.is_empty() {
            return Ok(false);
        }
        *row = sentences;
        Ok(true)
    }

    /// Encode raw text spans with a pretrained encoder and cache the result
    ///
    /// Each span is split into sentences; every sentence becomes one vector.
    /// Returns the number of nodes that received text.
    pub fn encode_spans<E>(
        &mut self,
        encoder: &E,
        node_type: NodeType,
        spans: &[(usize, String)],
    ) -> Result<usize>
    where
        E: SentenceEncoder,
        E::Error: std::fmt::Display,
    {
        if encoder.dimension() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                found: encoder.dimension(),
            });
        }
        let mut stored = 0;
        for (index, text) in spans {
            let vectors = split_sentences(text)
                .iter()
                .map(|s| encoder.encode(s).map_err(|e| StoreError::Encoder(e.to_string())))
                .collect::<Result<Vec<_>>>()?;
            if vectors.is_empty() {
                tracing::debug!("{} {} has no usable text", node_type, index);
                continue;
            }
            if self.set_if_absent(node_type, *index, vectors)? {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Export one population as padded tensors
    pub fn padded(&self, node_type: NodeType, device: &Device) -> Result<PaddedText> {
        let rows = self.rows(node_type);
        let n = rows.len();
        let max_len = rows.iter().map(|s| s.len()).max().unwrap_or(0).max(1);

        let mut sentences = vec![0f32; n * max_len * self.dim];
        let mut mask = vec![0f32; n * max_len];
        let mut present = vec![0f32; n];
        for (node, row) in rows.iter().enumerate() {
            if !row.is_empty() {
                present[node] = 1.0;
            }
            for (pos, vector) in row.iter().enumerate() {
                mask[node * max_len + pos] = 1.0;
                let start = (node * max_len + pos) * self.dim;
                sentences[start..start + self.dim].copy_from_slice(vector);
            }
        }

        Ok(PaddedText {
            sentences: Tensor::from_vec(sentences, (n, max_len, self.dim), device)?,
            mask: Tensor::from_vec(mask, (n, max_len), device)?,
            present: Tensor::from_vec(present, n, device)?,
            max_len,
        })
    }
}

/// Split a text span into trimmed, non-empty sentences
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(|c| matches!(c, '.' | '!' | '?' | '\n' | '。' | '！' | '？' | ';' | '；'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
