//! Dataset directories.
//!
//! A dataset directory holds plain-text interaction tables:
//!
//! | File | Content |
//! |------|---------|
//! | `success.txt` | `user item` rows both sides accepted (required for training) |
//! | `user_only.txt` | `user item` rows only the user accepted |
//! | `item_only.txt` | `user item` rows only the item accepted |
//! | `valid.txt` | held-out success rows for checkpoint selection |
//! | `test.txt` | held-out success rows for the final report |
//! | `user_text.tsv` | `index<TAB>text` descriptions of users |
//! | `item_text.tsv` | `index<TAB>text` descriptions of items |
//!
//! Blank lines and lines starting with `#` are skipped. Delta directories
//! used by `dpge update` share the layout, with every file optional.

use crate::error::{CliError, Result};
use dpge_domain::traits::{InteractionSource, SentenceEncoder};
use dpge_domain::{InteractionTables, NodeCounts, NodeType};
use dpge_store::{split_sentences, HashSentenceEncoder, TextCache};
use dpge_trainer::GraphDelta;
use std::fs;
use std::path::{Path, PathBuf};

/// A dataset directory on disk.
#[derive(Debug, Clone)]
pub struct DatasetDir {
    root: PathBuf,
}

impl DatasetDir {
    /// Open a directory; it must exist.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(CliError::InvalidInput(format!(
                "{} is not a dataset directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn text_file(node_type: NodeType) -> &'static str {
        match node_type {
            NodeType::User => "user_text.tsv",
            NodeType::Item => "item_text.tsv",
        }
    }

    /// True when either text file is present.
    pub fn has_text(&self) -> bool {
        [NodeType::User, NodeType::Item]
            .iter()
            .any(|t| self.file(Self::text_file(*t)).is_file())
    }

    /// Read the three interaction tables; missing files are empty.
    pub fn interactions(&self) -> Result<InteractionTables> {
        Ok(InteractionTables::new(
            read_pairs_if_present(&self.file("success.txt"))?,
            read_pairs_if_present(&self.file("user_only.txt"))?,
            read_pairs_if_present(&self.file("item_only.txt"))?,
        ))
    }

    fn held_out(&self, name: &str) -> Result<Option<InteractionTables>> {
        let path = self.file(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(InteractionTables::new(read_pairs(&path)?, vec![], vec![])))
    }

    /// Node counts covering every index in the tables and text files.
    pub fn counts_hint(&self) -> Result<NodeCounts> {
        let mut counts = self.interactions()?.counts_hint();
        for tables in [self.validation()?, self.test()?].into_iter().flatten() {
            counts = counts.max(tables.counts_hint());
        }
        for node_type in [NodeType::User, NodeType::Item] {
            if let Some(max) = self.node_text(node_type)?.iter().map(|(i, _)| i + 1).max() {
                counts = match node_type {
                    NodeType::User => counts.max(NodeCounts::new(max, 0)),
                    NodeType::Item => counts.max(NodeCounts::new(0, max)),
                };
            }
        }
        Ok(counts)
    }

    /// Encode the text files into `cache`, growing it to cover them.
    ///
    /// Nodes that already have cached sentences keep them. Returns the number
    /// of nodes that received text.
    pub fn encode_text(&self, cache: &mut TextCache) -> Result<usize> {
        let encoder = HashSentenceEncoder::new(cache.dim());
        let mut stored = 0;
        for node_type in [NodeType::User, NodeType::Item] {
            let spans = self.node_text(node_type)?;
            if let Some(max) = spans.iter().map(|(i, _)| i + 1).max() {
                let mut counts = cache.counts();
                match node_type {
                    NodeType::User => counts.users = counts.users.max(max),
                    NodeType::Item => counts.items = counts.items.max(max),
                }
                cache.grow_to(counts);
            }
            stored += cache.encode_spans(&encoder, node_type, &spans)?;
        }
        tracing::debug!("Encoded text for {} nodes from {}", stored, self.root.display());
        Ok(stored)
    }

    /// Read this directory as an incremental delta.
    ///
    /// Text spans are encoded to `sentence_dim`-sized vectors so the delta can
    /// be validated against the engine's cache before anything is applied.
    /// Without a dimension (text fusion off) the text files are ignored.
    pub fn delta(&self, sentence_dim: Option<usize>) -> Result<GraphDelta> {
        let mut delta = GraphDelta::new(self.interactions()?);
        let Some(sentence_dim) = sentence_dim else {
            if self.has_text() {
                tracing::debug!("Ignoring text in {}: text fusion is off", self.root.display());
            }
            return Ok(delta);
        };
        let encoder = HashSentenceEncoder::new(sentence_dim);
        for node_type in [NodeType::User, NodeType::Item] {
            let spans = self.node_text(node_type)?;
            if spans.is_empty() {
                continue;
            }
            let mut rows = Vec::with_capacity(spans.len());
            for (index, text) in spans {
                let sentences = split_sentences(&text)
                    .iter()
                    .map(|s| encoder.encode(s))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| CliError::InvalidInput(e.to_string()))?;
                if !sentences.is_empty() {
                    rows.push((index, sentences));
                }
            }
            delta = delta.with_text(node_type, rows);
        }
        Ok(delta)
    }
}

impl InteractionSource for DatasetDir {
    type Error = CliError;

    fn train(&self) -> Result<InteractionTables> {
        let path = self.file("success.txt");
        if !path.is_file() {
            return Err(CliError::InvalidInput(format!(
                "{} is missing success.txt",
                self.root.display()
            )));
        }
        let tables = self.interactions()?;
        tracing::info!(
            "Loaded {} interactions from {} (success={} user_only={} item_only={})",
            tables.len(),
            self.root.display(),
            tables.success.len(),
            tables.user_only.len(),
            tables.item_only.len()
        );
        Ok(tables)
    }

    fn validation(&self) -> Result<Option<InteractionTables>> {
        self.held_out("valid.txt")
    }

    fn test(&self) -> Result<Option<InteractionTables>> {
        self.held_out("test.txt")
    }

    fn node_text(&self, node_type: NodeType) -> Result<Vec<(usize, String)>> {
        let path = self.file(Self::text_file(node_type));
        if !path.is_file() {
            return Ok(Vec::new());
        }
        read_text(&path)
    }
}

fn content_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
}

fn parse_index(path: &Path, line: usize, token: &str) -> Result<usize> {
    token.parse().map_err(|_| CliError::Data {
        path: path.to_path_buf(),
        line,
        message: format!("'{}' is not a node index", token),
    })
}

/// Read whitespace-separated `user item` rows.
pub fn read_pairs(path: &Path) -> Result<Vec<(usize, usize)>> {
    let contents = fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for (line, text) in content_lines(&contents) {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(CliError::Data {
                path: path.to_path_buf(),
                line,
                message: format!("expected 'user item', found {} fields", fields.len()),
            });
        }
        pairs.push((
            parse_index(path, line, fields[0])?,
            parse_index(path, line, fields[1])?,
        ));
    }
    Ok(pairs)
}

fn read_pairs_if_present(path: &Path) -> Result<Vec<(usize, usize)>> {
    if path.is_file() {
        read_pairs(path)
    } else {
        Ok(Vec::new())
    }
}

/// Read `index<TAB>text` rows.
pub fn read_text(path: &Path) -> Result<Vec<(usize, String)>> {
    let contents = fs::read_to_string(path)?;
    let mut spans = Vec::new();
    for (line, text) in content_lines(&contents) {
        let (index, body) = text.split_once('\t').ok_or_else(|| CliError::Data {
            path: path.to_path_buf(),
            line,
            message: "expected 'index<TAB>text'".into(),
        })?;
        spans.push((parse_index(path, line, index.trim())?, body.to_string()));
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_lines_skip_comments() {
        let lines: Vec<_> = content_lines("# header\n\n0 1\n  # indented\n2 3\n").collect();
        assert_eq!(lines, vec![(3, "0 1"), (5, "2 3")]);
    }

    #[test]
    fn test_missing_directory() {
        assert!(matches!(
            DatasetDir::open("/nonexistent/dataset"),
            Err(CliError::InvalidInput(_))
        ));
    }
}
