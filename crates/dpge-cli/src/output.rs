//! Output formatting for the CLI.
//!
//! Every command prints exactly one document: a set of tables, one JSON
//! value, or quiet lines for scripting.

use crate::config::OutputFormat;
use crate::error::Result;
use colored::*;
use dpge_domain::{Direction, NodeType};
use dpge_graph::GraphStats;
use dpge_store::{CheckpointInfo, TextCache};
use dpge_trainer::{
    DirectionReport, EvalReport, ExtendOutcome, SelectionMetric, TrainingOutcome, UpdateOutcome,
};
use serde_json::{json, Value};
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Style},
};
use uuid::Uuid;

/// Output formatter.
pub struct Formatter {
    format: OutputFormat,
    color_enabled: bool,
}

impl Formatter {
    /// Create a new formatter.
    pub fn new(format: OutputFormat, color_enabled: bool) -> Self {
        Self {
            format,
            color_enabled,
        }
    }

    /// Selected output format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn render(builder: Builder) -> String {
        let mut table = builder.build();
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));
        table.to_string()
    }

    fn title(&self, text: &str) -> String {
        if self.color_enabled {
            text.bold().cyan().to_string()
        } else {
            text.to_string()
        }
    }

    fn json(value: &Value) -> Result<String> {
        Ok(serde_json::to_string_pretty(value)?)
    }

    /// Format a training run, with the test report when one was computed.
    pub fn format_training(
        &self,
        outcome: &TrainingOutcome,
        metric: SelectionMetric,
        test: Option<&EvalReport>,
    ) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let mut value = training_json(outcome, metric);
                if let Some(report) = test {
                    value["test"] = json!(report);
                }
                Self::json(&value)
            }
            OutputFormat::Table => {
                let mut out = vec![self.training_table(outcome, metric)];
                if let Some(report) = test {
                    out.push(self.report_table("test", None, report));
                }
                Ok(out.join("\n"))
            }
            OutputFormat::Quiet => Ok(match (outcome.checkpoint_id, outcome.best_score) {
                (Some(id), _) => id.to_string(),
                (None, Some(score)) => format!("{:.4}", score),
                (None, None) => String::new(),
            }),
        }
    }

    fn training_table(&self, outcome: &TrainingOutcome, metric: SelectionMetric) -> String {
        if outcome.history.is_empty() {
            return self.warning(&format!(
                "No epochs completed, stopped: {}",
                outcome.stop_reason.as_str()
            ));
        }

        let mut builder = Builder::default();
        builder.push_record([
            "Epoch",
            "Direction",
            "Loss",
            "Ranking",
            "Mutual",
            "Batches",
            metric.as_str(),
            "Best",
        ]);
        for record in &outcome.history {
            builder.push_record([
                record.epoch.to_string(),
                record.direction.to_string(),
                format!("{:.4}", record.loss.total),
                format!("{:.4}", record.loss.ranking),
                format!("{:.4}", record.loss.mutual_user + record.loss.mutual_item),
                if record.discarded > 0 {
                    format!("{} (-{})", record.batches, record.discarded)
                } else {
                    record.batches.to_string()
                },
                record.score.map(|s| format!("{:.4}", s)).unwrap_or_default(),
                if record.improved { "*".into() } else { String::new() },
            ]);
        }

        let mut out = vec![self.title("Training"), Self::render(builder)];
        match (outcome.best_epoch, outcome.best_score) {
            (Some(epoch), Some(score)) => out.push(self.success(&format!(
                "Best epoch {} (score {:.4}), stopped: {}",
                epoch,
                score,
                outcome.stop_reason.as_str()
            ))),
            _ => out.push(self.warning(&format!(
                "No checkpoint selected, stopped: {}",
                outcome.stop_reason.as_str()
            ))),
        }
        if let Some(id) = outcome.checkpoint_id {
            out.push(self.info(&format!("Checkpoint {}", id)));
        }
        if outcome.metrics.stale_resamples > 0 || outcome.metrics.discarded_batches > 0 {
            out.push(self.info(&format!(
                "{} stale batches resampled, {} batches discarded",
                outcome.metrics.stale_resamples, outcome.metrics.discarded_batches
            )));
        }
        out.join("\n")
    }

    /// Format an incremental update.
    pub fn format_update(
        &self,
        update: &UpdateOutcome,
        metric: SelectionMetric,
        checkpoint_id: Option<Uuid>,
    ) -> Result<String> {
        match self.format {
            OutputFormat::Json => Self::json(&json!({
                "extend": extend_json(&update.extend),
                "training": update.training.as_ref().map(|t| training_json(t, metric)),
                "checkpoint_id": checkpoint_id.map(|id| id.to_string()),
            })),
            OutputFormat::Table => {
                let mut out = vec![self.extend_line(&update.extend)];
                if let Some(training) = &update.training {
                    out.push(self.training_table(training, metric));
                }
                if let Some(id) = checkpoint_id {
                    out.push(self.info(&format!("Grown engine stored as checkpoint {}", id)));
                }
                Ok(out.join("\n"))
            }
            OutputFormat::Quiet => Ok(checkpoint_id.map(|id| id.to_string()).unwrap_or_default()),
        }
    }

    fn extend_line(&self, outcome: &ExtendOutcome) -> String {
        if outcome.is_noop() {
            return self.info("Delta already applied; nothing changed.");
        }
        self.success(&format!(
            "Grew {} to {} (+{} users, +{} items, +{} interactions, +{} text rows)",
            outcome.previous,
            outcome.counts,
            outcome.new_users(),
            outcome.new_items(),
            outcome.added_interactions,
            outcome.text_rows_added
        ))
    }

    /// Format an evaluation report.
    pub fn format_report(
        &self,
        split: &str,
        checkpoint: Option<Uuid>,
        report: &EvalReport,
    ) -> Result<String> {
        match self.format {
            OutputFormat::Json => Self::json(&json!({
                "split": split,
                "checkpoint_id": checkpoint.map(|id| id.to_string()),
                "report": report,
            })),
            OutputFormat::Table => Ok(self.report_table(split, checkpoint, report)),
            OutputFormat::Quiet => Ok(quiet_report(&report.bilateral)),
        }
    }

    fn report_table(&self, split: &str, checkpoint: Option<Uuid>, report: &EvalReport) -> String {
        let mut builder = Builder::default();
        builder.push_record(["Metric", "user → item", "item → user", "Bilateral"]);
        for metric in SelectionMetric::ALL {
            builder.push_record([
                metric.to_string(),
                format!("{:.4}", report.user_to_item.metric(metric)),
                format!("{:.4}", report.item_to_user.metric(metric)),
                format!("{:.4}", report.bilateral.metric(metric)),
            ]);
        }
        builder.push_record([
            "queries".to_string(),
            report.user_to_item.queries.to_string(),
            report.item_to_user.queries.to_string(),
            report.bilateral.queries.to_string(),
        ]);
        let title = match checkpoint {
            Some(id) => format!("Evaluation ({}, checkpoint {})", split, id),
            None => format!("Evaluation ({})", split),
        };
        format!("{}\n{}", self.title(&title), Self::render(builder))
    }

    /// Format a recommendation list.
    pub fn format_recommendations(
        &self,
        direction: Direction,
        query: usize,
        ranked: &[(usize, f32)],
    ) -> Result<String> {
        let candidate = direction.candidate_type();
        match self.format {
            OutputFormat::Json => Self::json(&json!({
                "direction": direction.as_str(),
                "query": query,
                "candidates": ranked
                    .iter()
                    .enumerate()
                    .map(|(rank, (index, score))| json!({
                        "rank": rank + 1,
                        (candidate.as_str()): index,
                        "score": score,
                    }))
                    .collect::<Vec<_>>(),
            })),
            OutputFormat::Table => {
                if ranked.is_empty() {
                    return Ok(self.warning("No unseen candidates."));
                }
                let mut builder = Builder::default();
                builder.push_record(["Rank".to_string(), capitalize(candidate.as_str()), "Score".into()]);
                for (rank, (index, score)) in ranked.iter().enumerate() {
                    builder.push_record([
                        (rank + 1).to_string(),
                        index.to_string(),
                        format!("{:.4}", score),
                    ]);
                }
                let title = format!("Top {} for {} {}", ranked.len(), direction.query_type(), query);
                Ok(format!("{}\n{}", self.title(&title), Self::render(builder)))
            }
            OutputFormat::Quiet => Ok(ranked
                .iter()
                .map(|(index, _)| index.to_string())
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }

    /// Format graph statistics, text coverage and stored checkpoints.
    pub fn format_inspect(
        &self,
        stats: &GraphStats,
        text: Option<&TextCache>,
        checkpoints: Option<&[CheckpointInfo]>,
    ) -> Result<String> {
        let coverage = text.map(|cache| {
            (
                cache.nodes_with_text(NodeType::User),
                cache.nodes_with_text(NodeType::Item),
            )
        });
        match self.format {
            OutputFormat::Json => {
                let mut value = graph_json(stats);
                if let Some((users, items)) = coverage {
                    value["users_with_text"] = json!(users);
                    value["items_with_text"] = json!(items);
                }
                if let Some(checkpoints) = checkpoints {
                    value["checkpoints"] = json!(checkpoints);
                }
                Self::json(&value)
            }
            OutputFormat::Table => {
                let mut out = vec![self.graph_table(stats, coverage)];
                if let Some(checkpoints) = checkpoints {
                    out.push(self.checkpoints_table(checkpoints));
                }
                Ok(out.join("\n"))
            }
            OutputFormat::Quiet => {
                let mut lines = vec![stats.to_string()];
                if let Some(checkpoints) = checkpoints {
                    lines.extend(checkpoints.iter().map(|c| c.id.to_string()));
                }
                Ok(lines.join("\n"))
            }
        }
    }

    fn graph_table(&self, stats: &GraphStats, coverage: Option<(usize, usize)>) -> String {
        let mut builder = Builder::default();
        builder.push_record(["Property", "Value"]);
        let mut rows = vec![
            ("Users", stats.counts.users.to_string()),
            ("Items", stats.counts.items.to_string()),
            ("Node-role copies", stats.counts.total_copies().to_string()),
            ("Success", stats.success_interactions.to_string()),
            ("User-only", stats.user_only_interactions.to_string()),
            ("Item-only", stats.item_only_interactions.to_string()),
            ("Directed edges", stats.directed_edges.to_string()),
            ("Self edges", stats.self_edges.to_string()),
            ("Self-only copies", stats.self_only_copies.to_string()),
            ("Density", format!("{:.6}", stats.density())),
        ];
        if let Some((users, items)) = coverage {
            rows.push(("Users with text", users.to_string()));
            rows.push(("Items with text", items.to_string()));
        }
        for (name, value) in rows {
            builder.push_record([name.to_string(), value]);
        }
        format!("{}\n{}", self.title("Graph"), Self::render(builder))
    }

    fn checkpoints_table(&self, checkpoints: &[CheckpointInfo]) -> String {
        if checkpoints.is_empty() {
            return self.colorize("No checkpoints found.", "yellow");
        }
        let mut builder = Builder::default();
        builder.push_record(["ID", "Model", "Users", "Items", "Dim", "Layers", "Epoch", "Score"]);
        for info in checkpoints {
            builder.push_record([
                info.id.to_string(),
                info.model.clone(),
                info.users.to_string(),
                info.items.to_string(),
                info.dim.to_string(),
                info.n_layers.to_string(),
                info.epoch.to_string(),
                format!("{:.4}", info.score),
            ]);
        }
        format!("{}\n{}", self.title("Checkpoints"), Self::render(builder))
    }

    /// Format a success message.
    pub fn success(&self, message: &str) -> String {
        self.colorize(&format!("✓ {}", message), "green")
    }

    /// Format an error message.
    pub fn error(&self, message: &str) -> String {
        self.colorize(&format!("✗ {}", message), "red")
    }

    /// Format an info message.
    pub fn info(&self, message: &str) -> String {
        self.colorize(&format!("ℹ {}", message), "blue")
    }

    /// Format a warning message.
    pub fn warning(&self, message: &str) -> String {
        self.colorize(&format!("⚠ {}", message), "yellow")
    }

    /// Colorize text if color is enabled.
    fn colorize(&self, text: &str, color: &str) -> String {
        if !self.color_enabled {
            return text.to_string();
        }

        match color {
            "red" => text.red().to_string(),
            "green" => text.green().to_string(),
            "blue" => text.blue().to_string(),
            "yellow" => text.yellow().to_string(),
            _ => text.to_string(),
        }
    }
}

fn training_json(outcome: &TrainingOutcome, metric: SelectionMetric) -> Value {
    json!({
        "best_epoch": outcome.best_epoch,
        "best_score": outcome.best_score,
        "selection_metric": metric.as_str(),
        "stop_reason": outcome.stop_reason.as_str(),
        "checkpoint_id": outcome.checkpoint_id.map(|id| id.to_string()),
        "epochs": outcome.metrics.epochs,
        "batches": outcome.metrics.batches,
        "discarded_batches": outcome.metrics.discarded_batches,
        "stale_resamples": outcome.metrics.stale_resamples,
        "runtime_secs": outcome.metrics.total_runtime_secs,
        "history": outcome.history,
    })
}

fn extend_json(outcome: &ExtendOutcome) -> Value {
    json!({
        "users": outcome.counts.users,
        "items": outcome.counts.items,
        "new_users": outcome.new_users(),
        "new_items": outcome.new_items(),
        "added_interactions": outcome.added_interactions,
        "text_rows_added": outcome.text_rows_added,
        "store_version": outcome.store_version,
    })
}

fn graph_json(stats: &GraphStats) -> Value {
    json!({
        "users": stats.counts.users,
        "items": stats.counts.items,
        "copies": stats.counts.total_copies(),
        "success_interactions": stats.success_interactions,
        "user_only_interactions": stats.user_only_interactions,
        "item_only_interactions": stats.item_only_interactions,
        "directed_edges": stats.directed_edges,
        "self_edges": stats.self_edges,
        "self_only_copies": stats.self_only_copies,
        "density": stats.density(),
    })
}

fn quiet_report(report: &DirectionReport) -> String {
    SelectionMetric::ALL
        .iter()
        .map(|m| format!("{}\t{:.4}", m, report.metric(*m)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpge_domain::NodeCounts;

    fn stats() -> GraphStats {
        GraphStats {
            counts: NodeCounts::new(3, 2),
            success_interactions: 2,
            user_only_interactions: 1,
            item_only_interactions: 0,
            self_edges: 10,
            directed_edges: 20,
            self_only_copies: 1,
        }
    }

    fn report() -> EvalReport {
        let u2i = DirectionReport {
            recall_at_5: 0.5,
            queries: 2,
            ..Default::default()
        };
        let i2u = DirectionReport {
            recall_at_5: 1.0,
            queries: 1,
            ..Default::default()
        };
        EvalReport::new(u2i, i2u)
    }

    #[test]
    fn test_report_table() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        let output = formatter.format_report("valid", None, &report()).unwrap();
        assert!(output.contains("recall@5"));
        assert!(output.contains("0.7500"));
        assert!(output.contains("Bilateral"));
    }

    #[test]
    fn test_report_json() {
        let formatter = Formatter::new(OutputFormat::Json, false);
        let output = formatter.format_report("test", None, &report()).unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["split"], "test");
        assert!(value["checkpoint_id"].is_null());
        assert_eq!(value["report"]["bilateral"]["recall@5"], 0.75);
    }

    #[test]
    fn test_report_quiet() {
        let formatter = Formatter::new(OutputFormat::Quiet, false);
        let output = formatter.format_report("valid", None, &report()).unwrap();
        assert!(output.lines().any(|l| l == "recall@5\t0.7500"));
        assert_eq!(output.lines().count(), SelectionMetric::ALL.len());
    }

    #[test]
    fn test_recommendations_quiet() {
        let formatter = Formatter::new(OutputFormat::Quiet, false);
        let output = formatter
            .format_recommendations(Direction::UserToItem, 0, &[(4, 0.9), (1, 0.2)])
            .unwrap();
        assert_eq!(output, "4\n1");
    }

    #[test]
    fn test_recommendations_json_names_candidate_type() {
        let formatter = Formatter::new(OutputFormat::Json, false);
        let output = formatter
            .format_recommendations(Direction::ItemToUser, 2, &[(7, 0.5)])
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["candidates"][0]["user"], 7);
        assert_eq!(value["candidates"][0]["rank"], 1);
        assert_eq!(value["direction"], "item-user");
    }

    #[test]
    fn test_inspect_table() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        let output = formatter.format_inspect(&stats(), None, Some(&[][..])).unwrap();
        assert!(output.contains("Directed edges"));
        assert!(!output.contains("with text"));
        assert!(output.contains("No checkpoints found"));
    }

    #[test]
    fn test_inspect_json_is_one_document() {
        let formatter = Formatter::new(OutputFormat::Json, false);
        let mut text = TextCache::new(2, NodeCounts::new(3, 2));
        text.set_if_absent(NodeType::Item, 1, vec![vec![0.6, 0.8]]).unwrap();
        let output = formatter.format_inspect(&stats(), Some(&text), Some(&[][..])).unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["directed_edges"], 20);
        assert_eq!(value["users_with_text"], 0);
        assert_eq!(value["items_with_text"], 1);
        assert_eq!(value["checkpoints"], json!([]));
    }

    #[test]
    fn test_colorize_disabled() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        assert_eq!(formatter.success("test"), "✓ test");
        assert_eq!(formatter.error("bad"), "✗ bad");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("item"), "Item");
        assert_eq!(capitalize(""), "");
    }
}
