//! Configuration for training runs
//!
//! Defines optimizer settings, epoch budgets, early stopping and the metric
//! used to pick the best checkpoint.

use crate::{Result, TrainerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metric that ranks checkpoints
///
/// The bilateral average of this metric over both directions decides which
/// epoch is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SelectionMetric {
    /// Precision at 1
    #[serde(rename = "precision@1")]
    PrecisionAt1,
    /// Precision at 5
    #[serde(rename = "precision@5")]
    PrecisionAt5,
    /// Precision at 10
    #[serde(rename = "precision@10")]
    PrecisionAt10,
    /// Recall at 5
    #[default]
    #[serde(rename = "recall@5")]
    RecallAt5,
    /// Recall at 10
    #[serde(rename = "recall@10")]
    RecallAt10,
    /// Mean reciprocal rank within the top 10
    #[serde(rename = "mrr@10")]
    MrrAt10,
    /// Normalized discounted cumulative gain at 5
    #[serde(rename = "ndcg@5")]
    NdcgAt5,
}

impl SelectionMetric {
    /// Every metric in report order
    pub const ALL: [SelectionMetric; 7] = [
        SelectionMetric::PrecisionAt1,
        SelectionMetric::PrecisionAt5,
        SelectionMetric::PrecisionAt10,
        SelectionMetric::RecallAt5,
        SelectionMetric::RecallAt10,
        SelectionMetric::MrrAt10,
        SelectionMetric::NdcgAt5,
    ];

    /// Report label
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMetric::PrecisionAt1 => "precision@1",
            SelectionMetric::PrecisionAt5 => "precision@5",
            SelectionMetric::PrecisionAt10 => "precision@10",
            SelectionMetric::RecallAt5 => "recall@5",
            SelectionMetric::RecallAt10 => "recall@10",
            SelectionMetric::MrrAt10 => "mrr@10",
            SelectionMetric::NdcgAt5 => "ndcg@5",
        }
    }
}

impl fmt::Display for SelectionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown selection metric: {}", s))
    }
}

/// Configuration for a [`BilateralTrainer`](crate::BilateralTrainer)
///
/// # Examples
///
/// ```
/// use dpge_trainer::TrainerConfig;
///
/// let config = TrainerConfig::default();
/// assert_eq!(config.batch_size, 1024);
///
/// // Short runs for smoke tests
/// let config = TrainerConfig::fast();
/// assert_eq!(config.max_epochs, 10);
///
/// // Long runs with generous patience
/// let config = TrainerConfig::thorough();
/// assert_eq!(config.patience, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// AdamW learning rate
    /// Default: 0.001
    pub learning_rate: f64,

    /// AdamW decoupled weight decay, on top of the explicit L2 term
    /// Default: 0.0
    pub weight_decay: f64,

    /// Quadruples per mini-batch
    /// Default: 1024
    pub batch_size: usize,

    /// Epoch budget
    /// Default: 100
    pub max_epochs: usize,

    /// Evaluations without improvement before stopping
    /// Default: 10
    pub patience: usize,

    /// Evaluate every N epochs (the last epoch is always evaluated)
    /// Default: 1
    pub eval_every: usize,

    /// Queries scored per full-sort chunk during evaluation
    /// Default: 512
    pub eval_batch_size: usize,

    /// Metric whose bilateral average selects the best checkpoint
    /// Default: recall@5
    pub selection_metric: SelectionMetric,

    /// Seed for negative sampling
    /// Default: 2024
    pub seed: u64,

    /// Sample the next batch on a producer thread while the current one trains
    /// Default: true
    pub prefetch: bool,

    /// Epochs of resumed training after an incremental update
    /// Default: 5
    pub resume_epochs: usize,
}

impl Default for TrainerConfig {
    /// Balanced settings for medium-sized graphs
    ///
    /// - Learning rate: 0.001
    /// - Batch size: 1024
    /// - Max epochs: 100, patience 10
    /// - Selection: recall@5
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.0,
            batch_size: 1024,
            max_epochs: 100,
            patience: 10,
            eval_every: 1,
            eval_batch_size: 512,
            selection_metric: SelectionMetric::RecallAt5,
            seed: 2024,
            prefetch: true,
            resume_epochs: 5,
        }
    }
}

impl TrainerConfig {
    /// Short runs with a high learning rate
    ///
    /// Suitable for smoke tests and toy graphs.
    ///
    /// - Learning rate: 0.01
    /// - Batch size: 256
    /// - Max epochs: 10, patience 3
    pub fn fast() -> Self {
        Self {
            learning_rate: 1e-2,
            batch_size: 256,
            max_epochs: 10,
            patience: 3,
            resume_epochs: 2,
            ..Self::default()
        }
    }

    /// Long runs with a low learning rate
    ///
    /// - Learning rate: 0.0005
    /// - Batch size: 2048
    /// - Max epochs: 400, patience 20
    pub fn thorough() -> Self {
        Self {
            learning_rate: 5e-4,
            batch_size: 2048,
            max_epochs: 400,
            patience: 20,
            resume_epochs: 20,
            ..Self::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "fast" => Some(Self::fast()),
            "thorough" => Some(Self::thorough()),
            _ => None,
        }
    }

    /// Reject settings that cannot produce a run
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainerError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(TrainerError::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("patience", self.patience),
            ("eval_every", self.eval_every),
            ("eval_batch_size", self.eval_batch_size),
        ] {
            if value == 0 {
                return Err(TrainerError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrainerConfig::default();
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.max_epochs, 100);
        assert_eq!(config.patience, 10);
        assert_eq!(config.selection_metric, SelectionMetric::RecallAt5);
        assert!(config.prefetch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_ordered() {
        let fast = TrainerConfig::fast();
        let thorough = TrainerConfig::thorough();
        assert!(fast.max_epochs < TrainerConfig::default().max_epochs);
        assert!(thorough.max_epochs > TrainerConfig::default().max_epochs);
        assert!(fast.learning_rate > thorough.learning_rate);
        assert_eq!(TrainerConfig::preset("fast"), Some(fast));
        assert!(TrainerConfig::preset("turbo").is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = TrainerConfig::default();
        config.patience = 0;
        assert!(config.validate().unwrap_err().to_string().contains("patience"));

        let mut config = TrainerConfig::default();
        config.learning_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = TrainerConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metric_names() {
        for metric in SelectionMetric::ALL {
            assert_eq!(metric.as_str().parse::<SelectionMetric>().unwrap(), metric);
        }
        assert!("auc".parse::<SelectionMetric>().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: TrainerConfig = toml::from_str(
            r#"
            batch_size = 64
            selection_metric = "ndcg@5"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.selection_metric, SelectionMetric::NdcgAt5);
        assert_eq!(config.patience, TrainerConfig::default().patience);
    }
}
