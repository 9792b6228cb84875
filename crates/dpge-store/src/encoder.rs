//! Hash-based sentence encoder
//!
//! Deterministic stand-in for a pretrained text encoder. It lets the full
//! text path (caching, padding, co-attention) run without model files.
//!
//! - **Deterministic**: the same sentence always maps to the same vector
//! - **Normalized**: every vector has unit length
//! - **Diverse**: different sentences map to different vectors
//!
//! # Examples
//!
//! ```rust
//! use dpge_domain::traits::SentenceEncoder;
//! use dpge_store::HashSentenceEncoder;
//!
//! let encoder = HashSentenceEncoder::new(32);
//! let v = encoder.encode("Senior Rust engineer").unwrap();
//! assert_eq!(v.len(), 32);
//! assert_eq!(v, encoder.encode("Senior Rust engineer").unwrap());
//! ```

use dpge_domain::traits::SentenceEncoder;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors produced by the hash encoder
#[derive(Error, Debug)]
pub enum EncoderError {
    /// Invalid input text
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Sentence encoder derived from text hashes
#[derive(Debug, Clone)]
pub struct HashSentenceEncoder {
    dimension: usize,
}

impl HashSentenceEncoder {
    /// Create an encoder producing `dimension`-sized vectors
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Hash text with a seed to a value in `[-1, 1]`
    fn hash_with_seed(text: &str, seed: u64) -> f32 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        seed.hash(&mut hasher);
        let value = hasher.finish();
        ((value as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32
    }
}

impl SentenceEncoder for HashSentenceEncoder {
    type Error = EncoderError;

    fn encode(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EncoderError::InvalidInput(
                "Empty text cannot be encoded".to_string(),
            ));
        }

        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| Self::hash_with_seed(text, i as u64))
            .collect();

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized() {
        let encoder = HashSentenceEncoder::new(64);
        let v = encoder.encode("data engineer").unwrap();
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_different_sentences_differ() {
        let encoder = HashSentenceEncoder::new(16);
        assert_ne!(
            encoder.encode("frontend").unwrap(),
            encoder.encode("backend").unwrap()
        );
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let encoder = HashSentenceEncoder::new(16);
        assert_eq!(encoder.encode("  ops ").unwrap(), encoder.encode("ops").unwrap());
    }

    #[test]
    fn test_empty_text() {
        let encoder = HashSentenceEncoder::new(16);
        let err = encoder.encode("   ").unwrap_err();
        assert!(err.to_string().contains("Empty text"));
    }
}
