//! Evaluation reports and training metrics

use crate::SelectionMetric;
use dpge_domain::Direction;
use dpge_model::LossBreakdown;
use serde::Serialize;

/// Ranking metrics for one direction, averaged over queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DirectionReport {
    /// Precision at 1
    #[serde(rename = "precision@1")]
    pub precision_at_1: f64,
    /// Precision at 5
    #[serde(rename = "precision@5")]
    pub precision_at_5: f64,
    /// Precision at 10
    #[serde(rename = "precision@10")]
    pub precision_at_10: f64,
    /// Recall at 5
    #[serde(rename = "recall@5")]
    pub recall_at_5: f64,
    /// Recall at 10
    #[serde(rename = "recall@10")]
    pub recall_at_10: f64,
    /// Mean reciprocal rank within the top 10
    #[serde(rename = "mrr@10")]
    pub mrr_at_10: f64,
    /// NDCG at 5
    #[serde(rename = "ndcg@5")]
    pub ndcg_at_5: f64,
    /// Queries with at least one held-out target
    pub queries: usize,
}

impl DirectionReport {
    /// Value of one metric
    pub fn metric(&self, metric: SelectionMetric) -> f64 {
        match metric {
            SelectionMetric::PrecisionAt1 => self.precision_at_1,
            SelectionMetric::PrecisionAt5 => self.precision_at_5,
            SelectionMetric::PrecisionAt10 => self.precision_at_10,
            SelectionMetric::RecallAt5 => self.recall_at_5,
            SelectionMetric::RecallAt10 => self.recall_at_10,
            SelectionMetric::MrrAt10 => self.mrr_at_10,
            SelectionMetric::NdcgAt5 => self.ndcg_at_5,
        }
    }

    /// Unweighted mean of two reports, metric by metric
    pub fn average(a: &DirectionReport, b: &DirectionReport) -> DirectionReport {
        let mean = |x: f64, y: f64| (x + y) / 2.0;
        DirectionReport {
            precision_at_1: mean(a.precision_at_1, b.precision_at_1),
            precision_at_5: mean(a.precision_at_5, b.precision_at_5),
            precision_at_10: mean(a.precision_at_10, b.precision_at_10),
            recall_at_5: mean(a.recall_at_5, b.recall_at_5),
            recall_at_10: mean(a.recall_at_10, b.recall_at_10),
            mrr_at_10: mean(a.mrr_at_10, b.mrr_at_10),
            ndcg_at_5: mean(a.ndcg_at_5, b.ndcg_at_5),
            queries: a.queries + b.queries,
        }
    }
}

/// Reports for both directions plus their average
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EvalReport {
    /// Users ranking items
    pub user_to_item: DirectionReport,
    /// Items ranking users
    pub item_to_user: DirectionReport,
    /// Metric-wise average of the two
    pub bilateral: DirectionReport,
}

impl EvalReport {
    /// Combine two direction reports
    pub fn new(user_to_item: DirectionReport, item_to_user: DirectionReport) -> Self {
        Self {
            bilateral: DirectionReport::average(&user_to_item, &item_to_user),
            user_to_item,
            item_to_user,
        }
    }

    /// Report for one direction
    pub fn direction(&self, direction: Direction) -> &DirectionReport {
        match direction {
            Direction::UserToItem => &self.user_to_item,
            Direction::ItemToUser => &self.item_to_user,
        }
    }

    /// Bilateral value of the selection metric
    pub fn selection_score(&self, metric: SelectionMetric) -> f64 {
        self.bilateral.metric(metric)
    }
}

fn direction_label<S: serde::Serializer>(
    direction: &Direction,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(direction.as_str())
}

/// What happened in one epoch
#[derive(Debug, Clone, Serialize)]
pub struct EpochRecord {
    /// Zero-based epoch number
    pub epoch: usize,
    /// Direction the batches were sampled in
    #[serde(serialize_with = "direction_label")]
    pub direction: Direction,
    /// Mean loss components over applied batches
    pub loss: LossBreakdown,
    /// Batches with a gradient step
    pub batches: usize,
    /// Batches dropped for a non-finite loss
    pub discarded: usize,
    /// Validation report, when this epoch was evaluated
    pub report: Option<EvalReport>,
    /// Selection score used for checkpointing
    pub score: Option<f64>,
    /// True when this epoch became the best checkpoint
    pub improved: bool,
}

/// Running totals across a training run
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Epochs completed
    pub epochs: usize,

    /// Batches with an applied gradient step
    pub batches: usize,

    /// Batches dropped for a non-finite loss
    pub discarded_batches: usize,

    /// Prefetched batches resampled because their snapshot was stale
    pub stale_resamples: usize,

    /// Evaluations run
    pub evaluations: usize,

    /// Checkpoints written to the checkpoint store
    pub checkpoints_saved: usize,

    /// Sum of loss components over applied batches
    loss_sum: LossBreakdown,

    /// Total runtime in seconds
    pub total_runtime_secs: f64,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied batch
    pub fn record_batch(&mut self, loss: &LossBreakdown) {
        self.batches += 1;
        self.loss_sum.ranking += loss.ranking;
        self.loss_sum.regularization += loss.regularization;
        self.loss_sum.mutual_user += loss.mutual_user;
        self.loss_sum.mutual_item += loss.mutual_item;
        self.loss_sum.total += loss.total;
    }

    /// Record a discarded batch
    pub fn record_discarded(&mut self) {
        self.discarded_batches += 1;
    }

    /// Record a stale-snapshot resample
    pub fn record_stale_resample(&mut self) {
        self.stale_resamples += 1;
    }

    /// Record a finished epoch
    pub fn record_epoch(&mut self) {
        self.epochs += 1;
    }

    /// Record an evaluation pass
    pub fn record_evaluation(&mut self) {
        self.evaluations += 1;
    }

    /// Record a persisted checkpoint
    pub fn record_checkpoint(&mut self) {
        self.checkpoints_saved += 1;
    }

    /// Mean loss components over all applied batches
    pub fn mean_loss(&self) -> LossBreakdown {
        let n = self.batches.max(1) as f32;
        LossBreakdown {
            ranking: self.loss_sum.ranking / n,
            regularization: self.loss_sum.regularization / n,
            mutual_user: self.loss_sum.mutual_user / n,
            mutual_item: self.loss_sum.mutual_item / n,
            total: self.loss_sum.total / n,
        }
    }

    /// Generate a summary report of metrics
    pub fn summary(&self) -> String {
        let loss = self.mean_loss();
        let lines = vec![
            "Training Metrics Summary".to_string(),
            "========================".to_string(),
            format!("Epochs: {}", self.epochs),
            format!(
                "Batches: {} applied, {} discarded, {} resampled",
                self.batches, self.discarded_batches, self.stale_resamples
            ),
            format!("Evaluations: {}", self.evaluations),
            format!("Checkpoints saved: {}", self.checkpoints_saved),
            String::new(),
            "Mean loss:".to_string(),
            format!("  ranking:        {:.6}", loss.ranking),
            format!("  regularization: {:.6}", loss.regularization),
            format!("  mutual (user):  {:.6}", loss.mutual_user),
            format!("  mutual (item):  {:.6}", loss.mutual_item),
            format!("  total:          {:.6}", loss.total),
            String::new(),
            format!("Runtime: {:.1}s", self.total_runtime_secs),
        ];
        lines.join("\n")
    }
}
