//! Model and loss hyperparameters
//!
//! Both structs deserialize from the `[model]` and `[loss]` sections of the
//! CLI settings file. Missing fields fall back to [`Default`].

use crate::{ModelError, Result};
use dpge_store::Initializer;
use serde::{Deserialize, Serialize};

/// Text fusion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Fuse cached sentence vectors into layer-0 embeddings
    pub enabled: bool,

    /// Dimensionality of the pretrained sentence vectors
    pub sentence_dim: usize,

    /// Hidden width of the self-attention scorers
    pub attention_hidden: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sentence_dim: 32,
            attention_hidden: 16,
        }
    }
}

/// Initialization settings for embeddings and encoder weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Distribution for embedding rows
    pub initializer: Initializer,

    /// Seed for every random draw of a run
    pub seed: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            initializer: Initializer::default(),
            seed: 42,
        }
    }
}

/// Structural hyperparameters of the dual-view model
///
/// # Examples
///
/// ```
/// use dpge_model::ModelConfig;
///
/// let config = ModelConfig::default();
/// assert_eq!(config.embedding_size, 64);
/// assert_eq!(config.n_layers, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Embedding dimensionality `D`
    pub embedding_size: usize,

    /// Propagation depth `L` (0 means identity propagation)
    pub n_layers: usize,

    /// Text fusion branch
    pub text: TextConfig,

    /// Initialization
    pub init: InitConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_size: 64,
            n_layers: 2,
            text: TextConfig::default(),
            init: InitConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Reject sizes the model cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.embedding_size == 0 {
            return Err(ModelError::InvalidConfig("embedding_size must be > 0".into()));
        }
        if self.text.enabled {
            if self.text.sentence_dim == 0 {
                return Err(ModelError::InvalidConfig("text.sentence_dim must be > 0".into()));
            }
            if self.text.attention_hidden == 0 {
                return Err(ModelError::InvalidConfig(
                    "text.attention_hidden must be > 0".into(),
                ));
            }
        }
        self.init.initializer.validate()?;
        Ok(())
    }

    /// Hash that checkpoints produced under this config must match
    pub fn config_hash(&self) -> u64 {
        dpge_store::config_hash(self.embedding_size, self.n_layers)
    }
}

/// Loss weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Coefficient of the L2 penalty on touched layer-0 rows
    pub reg_weight: f64,

    /// Coefficient of the user and item contrastive terms
    pub mutual_weight: f64,

    /// InfoNCE temperature
    pub temperature: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            reg_weight: 1e-4,
            mutual_weight: 0.1,
            temperature: 0.2,
        }
    }
}

impl LossConfig {
    /// Reject negative weights and non-positive temperatures
    pub fn validate(&self) -> Result<()> {
        if !(self.reg_weight >= 0.0 && self.reg_weight.is_finite()) {
            return Err(ModelError::InvalidConfig(format!(
                "reg_weight must be >= 0, got {}",
                self.reg_weight
            )));
        }
        if !(self.mutual_weight >= 0.0 && self.mutual_weight.is_finite()) {
            return Err(ModelError::InvalidConfig(format!(
                "mutual_weight must be >= 0, got {}",
                self.mutual_weight
            )));
        }
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(ModelError::InvalidConfig(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ModelConfig::default().validate().is_ok());
        assert!(LossConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let config = ModelConfig {
            embedding_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = ModelConfig::default();
        config.text.enabled = true;
        config.text.sentence_dim = 0;
        assert!(config.validate().is_err());

        let loss = LossConfig {
            temperature: 0.0,
            ..Default::default()
        };
        assert!(loss.validate().is_err());
        let loss = LossConfig {
            reg_weight: -1.0,
            ..Default::default()
        };
        assert!(loss.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: ModelConfig = toml::from_str(
            r#"
            embedding_size = 16

            [text]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding_size, 16);
        assert_eq!(config.n_layers, 2);
        assert!(config.text.enabled);
        assert_eq!(config.text.sentence_dim, 32);
    }

    #[test]
    fn test_hash_ignores_text_and_seed() {
        let a = ModelConfig::default();
        let mut b = ModelConfig::default();
        b.init.seed = 7;
        b.text.enabled = true;
        assert_eq!(a.config_hash(), b.config_hash());

        let c = ModelConfig {
            n_layers: 3,
            ..Default::default()
        };
        assert_ne!(a.config_hash(), c.config_hash());
    }
}
