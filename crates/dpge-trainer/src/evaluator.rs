//! Full-sort ranking evaluation
//!
//! Every query is scored against every candidate with one matmul per chunk,
//! training interactions are masked, and the per-query metrics are computed
//! in parallel with rayon.

use crate::{DirectionReport, EvalReport, Result};
use dpge_domain::{Direction, InteractionTables, NodeType};
use dpge_model::{PropagatedEmbeddings, ScoringModel};
use rayon::prelude::*;

/// Largest cut-off any metric looks at
const TOP_K: usize = 10;

/// Held-out targets per query for one direction
#[derive(Debug, Clone)]
pub struct HeldOut {
    direction: Direction,
    queries: Vec<(usize, Vec<usize>)>,
}

impl HeldOut {
    /// Group the success pairs of `tables` by query node
    pub fn from_tables(tables: &InteractionTables, direction: Direction) -> Self {
        let mut grouped: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
        for &(user, item) in &tables.success {
            let (query, target) = direction.from_pair(user, item);
            grouped.entry(query).or_default().push(target);
        }
        let queries = grouped
            .into_iter()
            .map(|(q, mut targets)| {
                targets.sort_unstable();
                targets.dedup();
                (q, targets)
            })
            .collect();
        Self { direction, queries }
    }

    /// Direction these targets belong to
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// `(query, sorted targets)` pairs
    pub fn queries(&self) -> &[(usize, Vec<usize>)] {
        &self.queries
    }

    /// True when there is nothing to evaluate
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Candidates each query has already seen in training
#[derive(Debug, Clone, Default)]
pub struct SeenMask {
    by_user: Vec<Vec<usize>>,
    by_item: Vec<Vec<usize>>,
}

impl SeenMask {
    /// Collect every interaction kind of the training tables
    pub fn from_tables(tables: &InteractionTables) -> Self {
        let counts = tables.counts_hint();
        let mut by_user = vec![Vec::new(); counts.users];
        let mut by_item = vec![Vec::new(); counts.items];
        for interaction in tables.interactions() {
            by_user[interaction.user].push(interaction.item);
            by_item[interaction.item].push(interaction.user);
        }
        for list in by_user.iter_mut().chain(by_item.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }
        Self { by_user, by_item }
    }

    /// Sorted candidates seen by `query` in `direction`
    pub fn seen(&self, direction: Direction, query: usize) -> &[usize] {
        let lists = match direction.query_type() {
            NodeType::User => &self.by_user,
            NodeType::Item => &self.by_item,
        };
        lists.get(query).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct QueryMetrics {
    precision: [f64; 3],
    recall: [f64; 2],
    mrr: f64,
    ndcg: f64,
}

/// Top candidates by descending score, ties broken by lower index
fn top_candidates(scores: &[f32], seen: &[usize], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(c, s)| s.is_finite() && seen.binary_search(c).is_err())
        .collect();
    let by_score = |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    if ranked.len() > k {
        ranked.select_nth_unstable_by(k, by_score);
        ranked.truncate(k);
    }
    ranked.sort_by(by_score);
    ranked
}

/// Prefix of sorted `targets` that indexes an existing candidate
fn reachable(targets: &[usize], n_candidates: usize) -> &[usize] {
    &targets[..targets.partition_point(|&t| t < n_candidates)]
}

fn query_metrics(ranked: &[(usize, f32)], targets: &[usize]) -> QueryMetrics {
    let hit: Vec<bool> = ranked
        .iter()
        .map(|(c, _)| targets.binary_search(c).is_ok())
        .collect();
    let hits_at = |k: usize| hit.iter().take(k).filter(|&&h| h).count() as f64;
    let n_targets = targets.len() as f64;

    let mrr = hit
        .iter()
        .take(10)
        .position(|&h| h)
        .map(|p| 1.0 / (p + 1) as f64)
        .unwrap_or(0.0);
    let dcg: f64 = hit
        .iter()
        .take(5)
        .enumerate()
        .filter(|&(_, &h)| h)
        .map(|(p, _)| 1.0 / ((p + 2) as f64).log2())
        .sum();
    let idcg: f64 = (0..targets.len().min(5))
        .map(|p| 1.0 / ((p + 2) as f64).log2())
        .sum();

    QueryMetrics {
        precision: [hits_at(1), hits_at(5) / 5.0, hits_at(10) / 10.0],
        recall: [hits_at(5) / n_targets, hits_at(10) / n_targets],
        mrr,
        ndcg: if idcg > 0.0 { dcg / idcg } else { 0.0 },
    }
}

fn average(metrics: &[QueryMetrics]) -> DirectionReport {
    if metrics.is_empty() {
        return DirectionReport::default();
    }
    let n = metrics.len() as f64;
    let mean = |f: fn(&QueryMetrics) -> f64| metrics.iter().map(f).sum::<f64>() / n;
    DirectionReport {
        precision_at_1: mean(|m| m.precision[0]),
        precision_at_5: mean(|m| m.precision[1]),
        precision_at_10: mean(|m| m.precision[2]),
        recall_at_5: mean(|m| m.recall[0]),
        recall_at_10: mean(|m| m.recall[1]),
        mrr_at_10: mean(|m| m.mrr),
        ndcg_at_5: mean(|m| m.ndcg),
        queries: metrics.len(),
    }
}

/// Scores held-out interactions in both directions
#[derive(Debug, Clone)]
pub struct RankingEvaluator {
    user_to_item: HeldOut,
    item_to_user: HeldOut,
    seen: SeenMask,
    batch_size: usize,
}

impl RankingEvaluator {
    /// Evaluator for `held_out` success pairs, masking `train`
    pub fn new(held_out: &InteractionTables, train: &InteractionTables, batch_size: usize) -> Self {
        Self {
            user_to_item: HeldOut::from_tables(held_out, Direction::UserToItem),
            item_to_user: HeldOut::from_tables(held_out, Direction::ItemToUser),
            seen: SeenMask::from_tables(train),
            batch_size: batch_size.max(1),
        }
    }

    /// Held-out targets for a direction
    pub fn held_out(&self, direction: Direction) -> &HeldOut {
        match direction {
            Direction::UserToItem => &self.user_to_item,
            Direction::ItemToUser => &self.item_to_user,
        }
    }

    /// True when there are no held-out pairs in either direction
    pub fn is_empty(&self) -> bool {
        self.user_to_item.is_empty() && self.item_to_user.is_empty()
    }

    /// Metrics for one direction
    ///
    /// Queries the embeddings do not cover are skipped, and so are targets
    /// outside the candidate tables. A query left without targets is skipped.
    pub fn evaluate(&self, embeddings: &PropagatedEmbeddings, direction: Direction) -> Result<DirectionReport> {
        let scorer = ScoringModel::new(embeddings);
        let counts = embeddings.counts()?;
        let n_queries = counts.of(direction.query_type());
        let n_candidates = counts.of(direction.candidate_type());
        let queries: Vec<(usize, &[usize])> = self
            .held_out(direction)
            .queries()
            .iter()
            .filter(|(q, _)| *q < n_queries)
            .map(|(q, targets)| (*q, reachable(targets, n_candidates)))
            .filter(|(_, targets)| !targets.is_empty())
            .collect();
        let skipped = self.held_out(direction).queries().len() - queries.len();
        if skipped > 0 {
            tracing::debug!(
                "Skipping {} {} queries outside the embedding tables",
                skipped,
                direction
            );
        }

        let mut per_query = Vec::with_capacity(queries.len());
        for chunk in queries.chunks(self.batch_size) {
            let ids: Vec<usize> = chunk.iter().map(|(q, _)| *q).collect();
            let scores = scorer.full_sort(direction, &ids)?.to_vec2::<f32>()?;
            let chunk_metrics: Vec<QueryMetrics> = scores
                .par_iter()
                .zip(chunk.par_iter())
                .map(|(row, (query, targets))| {
                    let ranked = top_candidates(row, self.seen.seen(direction, *query), TOP_K);
                    query_metrics(&ranked, targets)
                })
                .collect();
            per_query.extend(chunk_metrics);
        }
        Ok(average(&per_query))
    }

    /// Metrics for both directions and their average
    pub fn evaluate_bilateral(&self, embeddings: &PropagatedEmbeddings) -> Result<EvalReport> {
        let report = EvalReport::new(
            self.evaluate(embeddings, Direction::UserToItem)?,
            self.evaluate(embeddings, Direction::ItemToUser)?,
        );
        tracing::debug!(
            "Evaluated {} + {} queries, bilateral recall@5 {:.4}",
            report.user_to_item.queries,
            report.item_to_user.queries,
            report.bilateral.recall_at_5
        );
        Ok(report)
    }

    /// Top `k` unseen candidates for one query
    pub fn recommend(
        &self,
        embeddings: &PropagatedEmbeddings,
        direction: Direction,
        query: usize,
        k: usize,
    ) -> Result<Vec<(usize, f32)>> {
        let scores = ScoringModel::new(embeddings)
            .full_sort(direction, &[query])?
            .squeeze(0)?
            .to_vec1::<f32>()?;
        Ok(top_candidates(&scores, self.seen.seen(direction, query), k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn test_held_out_grouping() {
        let tables = InteractionTables::new(vec![(0, 2), (1, 2), (0, 1), (0, 2)], vec![], vec![]);
        let u2i = HeldOut::from_tables(&tables, Direction::UserToItem);
        assert_eq!(u2i.queries(), &[(0, vec![1, 2]), (1, vec![2])]);
        let i2u = HeldOut::from_tables(&tables, Direction::ItemToUser);
        assert_eq!(i2u.queries(), &[(1, vec![0]), (2, vec![0, 1])]);
    }

    #[test]
    fn test_seen_mask_covers_all_kinds() {
        let tables = InteractionTables::new(vec![(0, 0)], vec![(0, 2)], vec![(1, 0)]);
        let mask = SeenMask::from_tables(&tables);
        assert_eq!(mask.seen(Direction::UserToItem, 0), &[0, 2]);
        assert_eq!(mask.seen(Direction::ItemToUser, 0), &[0, 1]);
        assert!(mask.seen(Direction::UserToItem, 7).is_empty());
    }

    #[test]
    fn test_top_candidates_masks_and_orders() {
        let scores = [0.5, 0.9, 0.9, 0.1, f32::NAN];
        let ranked = top_candidates(&scores, &[2], 3);
        let ids: Vec<usize> = ranked.iter().map(|(c, _)| *c).collect();
        assert_eq!(ids, vec![1, 0, 3]);
    }

    #[test]
    fn test_perfect_ranking_metrics() {
        let m = query_metrics(&[(4, 1.0), (7, 0.5)], &[4]);
        assert_eq!(m.precision[0], 1.0);
        assert_eq!(m.recall[0], 1.0);
        assert_eq!(m.mrr, 1.0);
        assert!((m.ndcg - 1.0).abs() < 1e-12);
        assert_eq!(m.precision[1], 0.2);
    }

    #[test]
    fn test_second_place_metrics() {
        let m = query_metrics(&[(1, 1.0), (4, 0.5)], &[4, 9]);
        assert_eq!(m.precision[0], 0.0);
        assert_eq!(m.mrr, 0.5);
        assert_eq!(m.recall[0], 0.5);
        let expected = (1.0 / 3f64.log2()) / (1.0 + 1.0 / 3f64.log2());
        assert!((m.ndcg - expected).abs() < 1e-12);
    }

    fn identity_embeddings() -> PropagatedEmbeddings {
        let d = &Device::Cpu;
        let eye = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], d).unwrap();
        PropagatedEmbeddings {
            user_active: eye.clone(),
            item_passive: eye.clone(),
            user_passive: eye.clone(),
            item_active: eye,
        }
    }

    #[test]
    fn test_matching_embeddings_score_perfectly() {
        // user k prefers item k in both directions
        let held_out = InteractionTables::new(vec![(0, 0), (1, 1)], vec![], vec![]);
        let evaluator = RankingEvaluator::new(&held_out, &InteractionTables::default(), 1);
        let report = evaluator.evaluate_bilateral(&identity_embeddings()).unwrap();
        for r in [report.user_to_item, report.item_to_user, report.bilateral] {
            assert_eq!(r.precision_at_1, 1.0);
            assert_eq!(r.mrr_at_10, 1.0);
            assert_eq!(r.recall_at_5, 1.0);
        }
        assert_eq!(report.bilateral.queries, 4);
    }

    #[test]
    fn test_recommend_masks_training() {
        let train = InteractionTables::new(vec![(0, 0)], vec![], vec![]);
        let evaluator = RankingEvaluator::new(&InteractionTables::default(), &train, 8);
        let recs = evaluator
            .recommend(&identity_embeddings(), Direction::UserToItem, 0, 5)
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].0, 1);
    }

    #[test]
    fn test_out_of_range_queries_skipped() {
        let held_out = InteractionTables::new(vec![(0, 0), (5, 1)], vec![], vec![]);
        let evaluator = RankingEvaluator::new(&held_out, &InteractionTables::default(), 4);
        let report = evaluator
            .evaluate(&identity_embeddings(), Direction::UserToItem)
            .unwrap();
        assert_eq!(report.queries, 1);
    }

    #[test]
    fn test_unreachable_targets_not_counted() {
        // item 9 does not exist, so user 0 recalls everything it can
        let held_out = InteractionTables::new(vec![(0, 0), (0, 9), (1, 7)], vec![], vec![]);
        let evaluator = RankingEvaluator::new(&held_out, &InteractionTables::default(), 4);
        let report = evaluator
            .evaluate(&identity_embeddings(), Direction::UserToItem)
            .unwrap();
        assert_eq!(report.queries, 1);
        assert_eq!(report.recall_at_5, 1.0);
        assert!((report.ndcg_at_5 - 1.0).abs() < 1e-12);
        assert_eq!(reachable(&[0, 1, 9], 2), &[0, 1]);
    }

    #[test]
    fn test_empty_only_without_pairs() {
        let empty = RankingEvaluator::new(&InteractionTables::default(), &InteractionTables::default(), 4);
        assert!(empty.is_empty());
        let held_out = InteractionTables::new(vec![(0, 1)], vec![], vec![]);
        let evaluator = RankingEvaluator::new(&held_out, &InteractionTables::default(), 4);
        assert!(!evaluator.is_empty());
        assert!(!evaluator.held_out(Direction::ItemToUser).is_empty());
    }
}
