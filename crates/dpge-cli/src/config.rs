//! Settings file for the CLI.
//!
//! Lives at `~/.dpge/config.toml` unless `--config` points elsewhere. Every
//! section is optional; a missing file means all defaults.
//!
//! ```toml
//! [model]
//! embedding_size = 64
//! n_layers = 2
//!
//! [model.text]
//! enabled = true
//! sentence_dim = 32
//!
//! [loss]
//! reg_weight = 0.0001
//!
//! [trainer]
//! max_epochs = 50
//! selection_metric = "ndcg@5"
//!
//! [data]
//! db = "runs/checkpoints.db"
//! model = "dpge-text"
//!
//! [output]
//! format = "json"
//! color = false
//! ```

use crate::error::{CliError, Result};
use dpge_model::{LossConfig, ModelConfig};
use dpge_trainer::TrainerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything the CLI reads from its settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Model hyperparameters
    #[serde(default)]
    pub model: ModelConfig,

    /// Loss weights
    #[serde(default)]
    pub loss: LossConfig,

    /// Training loop settings
    #[serde(default)]
    pub trainer: TrainerConfig,

    /// Where checkpoints go and which model to build
    #[serde(default)]
    pub data: DataSettings,

    /// Output preferences
    #[serde(default)]
    pub output: OutputSettings,
}

/// Checkpoint database and model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Checkpoint database used when `--db` is not given
    #[serde(default = "default_db")]
    pub db: PathBuf,

    /// Registered model identifier used when `--model` is not given
    #[serde(default = "default_model")]
    pub model: String,
}

/// Output preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,

    /// Default output format
    #[serde(default = "default_format")]
    pub format: OutputFormat,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format
    Table,
    /// JSON format
    Json,
    /// Quiet (minimal) format
    Quiet,
}

impl Settings {
    /// Default settings file path.
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CliError::Config("Could not find home directory".into()))?;
        Ok(home.join(".dpge").join("config.toml"))
    }

    /// Load settings.
    ///
    /// An explicit path must exist. The default path may be absent, in
    /// which case defaults are returned.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::Config(format!(
                        "Settings file {} does not exist",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => {
                let path = Self::path()?;
                if !path.exists() {
                    tracing::debug!("No settings at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let settings = Self::from_toml(&fs::read_to_string(&path)?)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| CliError::Config(format!("Failed to serialize settings: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.loss.validate()?;
        self.trainer.validate()?;
        if self.data.model.trim().is_empty() {
            return Err(CliError::Config("data.model must not be empty".into()));
        }
        Ok(())
    }

    /// Model config for the given identifier.
    ///
    /// `dpge-text` always fuses text, whatever `[model.text]` says.
    pub fn model_config_for(&self, model: &str) -> ModelConfig {
        let mut config = self.model.clone();
        if model == "dpge-text" {
            config.text.enabled = true;
        }
        config
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            db: default_db(),
            model: default_model(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            color: true,
            format: OutputFormat::Table,
        }
    }
}

fn default_db() -> PathBuf {
    PathBuf::from("dpge.db")
}

fn default_model() -> String {
    "dpge".to_string()
}

fn default_true() -> bool {
    true
}

fn default_format() -> OutputFormat {
    OutputFormat::Table
}
