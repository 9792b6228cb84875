//! Negative sampling
//!
//! Positives are the training success pairs. For each quadruple the sampler
//! draws a query that has positives, one of its positive candidates, a
//! negative candidate outside the query's positives and a negative query
//! outside the candidate's positives. The result is oriented back to
//! `(user, pos_item, neg_item, neg_user)` so the loss never sees the
//! direction.

use crate::{Result, TrainerError};
use dpge_domain::{Direction, NodeCounts, NodeType};
use dpge_model::PairBatch;
use dpge_store::StoreSnapshot;
use rand::Rng;

/// Rejection-sampling attempts before settling for a uniform draw
const MAX_REJECTIONS: usize = 32;

/// Sorted positive lists per node
#[derive(Debug, Clone, Default)]
pub struct Positives {
    by_user: Vec<Vec<usize>>,
    by_item: Vec<Vec<usize>>,
    pairs: usize,
}

impl Positives {
    /// Index `(user, item)` pairs, collapsing duplicates
    pub fn from_pairs(pairs: &[(usize, usize)], counts: NodeCounts) -> Self {
        let mut by_user = vec![Vec::new(); counts.users];
        let mut by_item = vec![Vec::new(); counts.items];
        for &(user, item) in pairs {
            if user < counts.users && item < counts.items {
                by_user[user].push(item);
                by_item[item].push(user);
            }
        }
        for list in by_user.iter_mut().chain(by_item.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }
        let pairs = by_user.iter().map(Vec::len).sum();
        Self {
            by_user,
            by_item,
            pairs,
        }
    }

    /// Distinct positive pairs
    pub fn len(&self) -> usize {
        self.pairs
    }

    /// True when there are no positives
    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    /// Positive partners of a node
    pub fn of(&self, node_type: NodeType, index: usize) -> &[usize] {
        let lists = match node_type {
            NodeType::User => &self.by_user,
            NodeType::Item => &self.by_item,
        };
        lists.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when `(user, item)` is a positive pair
    pub fn contains(&self, user: usize, item: usize) -> bool {
        self.of(NodeType::User, user).binary_search(&item).is_ok()
    }

    /// Nodes of a population that have at least one positive
    pub fn active(&self, node_type: NodeType) -> Vec<usize> {
        let lists = match node_type {
            NodeType::User => &self.by_user,
            NodeType::Item => &self.by_item,
        };
        lists
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.is_empty())
            .map(|(i, _)| i)
            .collect()
    }
}

/// A sampled mini-batch and the store version it was drawn against
#[derive(Debug, Clone)]
pub struct Batch {
    /// Oriented quadruples
    pub pairs: PairBatch,
    /// Direction the queries were drawn from
    pub direction: Direction,
    /// Node counts and version used for the negative ranges
    pub snapshot: StoreSnapshot,
}

/// Draws training quadruples from the success table
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    positives: Positives,
    user_queries: Vec<usize>,
    item_queries: Vec<usize>,
    snapshot: StoreSnapshot,
    batch_size: usize,
}

impl NegativeSampler {
    /// Build a sampler over `success` pairs for a store at `snapshot`
    pub fn new(success: &[(usize, usize)], snapshot: StoreSnapshot, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainerError::Config("batch_size must be at least 1".into()));
        }
        let positives = Positives::from_pairs(success, snapshot.counts);
        if positives.is_empty() {
            return Err(TrainerError::NoTrainingData);
        }
        Ok(Self {
            user_queries: positives.active(NodeType::User),
            item_queries: positives.active(NodeType::Item),
            positives,
            snapshot,
            batch_size,
        })
    }

    /// Positive lists
    pub fn positives(&self) -> &Positives {
        &self.positives
    }

    /// Snapshot this sampler was built against
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot
    }

    /// Batches in one pass over the positives
    pub fn batches_per_epoch(&self) -> usize {
        self.positives.len().div_ceil(self.batch_size).max(1)
    }

    /// Sample a batch against the sampler's own snapshot
    pub fn sample<R: Rng + ?Sized>(&self, direction: Direction, rng: &mut R) -> Batch {
        self.sample_with(direction, self.snapshot, rng)
    }

    /// Sample a batch whose negatives range over `snapshot`'s node counts
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        direction: Direction,
        snapshot: StoreSnapshot,
        rng: &mut R,
    ) -> Batch {
        let query_type = direction.query_type();
        let candidate_type = direction.candidate_type();
        let queries = match query_type {
            NodeType::User => &self.user_queries,
            NodeType::Item => &self.item_queries,
        };
        let n_queries = snapshot.counts.of(query_type);
        let n_candidates = snapshot.counts.of(candidate_type);

        let mut pairs = PairBatch::default();
        for _ in 0..self.batch_size {
            let query = queries[rng.gen_range(0..queries.len())];
            let own = self.positives.of(query_type, query);
            let candidate = own[rng.gen_range(0..own.len())];
            let neg_candidate = draw_outside(n_candidates, own, rng);
            let neg_query =
                draw_outside(n_queries, self.positives.of(candidate_type, candidate), rng);

            let (user, pos_item) = direction.orient(query, candidate);
            let (neg_user, neg_item) = direction.orient(neg_query, neg_candidate);
            pairs.push(user, pos_item, neg_item, neg_user);
        }
        Batch {
            pairs,
            direction,
            snapshot,
        }
    }
}

/// Index in `0..count` not in the sorted `excluded` list
///
/// Rejection sampling first. When every attempt lands on an excluded index
/// the range is scanned from a random start, and only a fully excluded range
/// yields an excluded index.
fn draw_outside<R: Rng + ?Sized>(count: usize, excluded: &[usize], rng: &mut R) -> usize {
    let mut pick = rng.gen_range(0..count);
    for _ in 0..MAX_REJECTIONS {
        if excluded.binary_search(&pick).is_err() {
            return pick;
        }
        pick = rng.gen_range(0..count);
    }
    (0..count)
        .map(|k| (pick + k) % count)
        .find(|c| excluded.binary_search(c).is_err())
        .unwrap_or(pick)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use dpge_store::seeded_rng;
    use proptest::prelude::*;

    fn success_pairs() -> impl Strategy<Value = Vec<(usize, usize)>> {
        prop::collection::vec((0usize..6, 0usize..6), 1..24)
    }

    proptest! {
        #[test]
        fn test_negatives_avoid_positives_when_possible(
            pairs in success_pairs(),
            seed in any::<u64>(),
            item_first in any::<bool>(),
        ) {
            let counts = NodeCounts::new(6, 6);
            let snapshot = StoreSnapshot { version: 0, counts };
            let sampler = NegativeSampler::new(&pairs, snapshot, 16).unwrap();
            let direction = if item_first { Direction::ItemToUser } else { Direction::UserToItem };
            let batch = sampler.sample(direction, &mut seeded_rng(seed));
            let p = sampler.positives();

            for k in 0..batch.pairs.len() {
                let (u, i) = (batch.pairs.users[k], batch.pairs.pos_items[k]);
                let (neg_i, neg_u) = (batch.pairs.neg_items[k], batch.pairs.neg_users[k]);
                prop_assert!(p.contains(u, i));
                prop_assert!(neg_i < counts.items && neg_u < counts.users);

                // Either direction: the corrupted item avoids the user's
                // positives and the corrupted user avoids the item's, unless
                // the node is linked to everything.
                let item_free = p.of(NodeType::User, u).len() < counts.items;
                let user_free = p.of(NodeType::Item, i).len() < counts.users;
                if item_free {
                    prop_assert!(!p.contains(u, neg_i));
                }
                if user_free {
                    prop_assert!(!p.contains(neg_u, i));
                }
            }
        }
    }
}
