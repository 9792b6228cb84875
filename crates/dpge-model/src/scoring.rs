//! Dual dot-product scoring
//!
//! `score(u, i) = <ua(u), ip(i)> + <up(u), ia(i)>`
//!
//! The same formula serves both directions. Asking from the item side only
//! changes which population indexes the rows of the score matrix.

use crate::{ModelError, PropagatedEmbeddings, Result};
use candle_core::Tensor;
use dpge_domain::{Direction, NodeType};

/// Scores user/item pairs from propagated embeddings
#[derive(Debug, Clone, Copy)]
pub struct ScoringModel<'a> {
    embeddings: &'a PropagatedEmbeddings,
}

fn index_tensor(indices: &[usize], count: usize, like: &Tensor) -> Result<Tensor> {
    let mut ids = Vec::with_capacity(indices.len());
    for &index in indices {
        if index >= count {
            return Err(ModelError::QueryOutOfRange { index, count });
        }
        ids.push(index as u32);
    }
    Ok(Tensor::from_vec(ids, indices.len(), like.device())?)
}

impl<'a> ScoringModel<'a> {
    /// Wrap propagated embeddings
    pub fn new(embeddings: &'a PropagatedEmbeddings) -> Self {
        Self { embeddings }
    }

    fn count(&self, node_type: NodeType) -> Result<usize> {
        Ok(match node_type {
            NodeType::User => self.embeddings.user_active.dim(0)?,
            NodeType::Item => self.embeddings.item_active.dim(0)?,
        })
    }

    /// The two dot-product terms `(r, s)` for aligned index tensors
    ///
    /// `r = <ua, ip>`, `s = <up, ia>`, both `[B]`. Differentiable.
    pub fn pair_terms(&self, users: &Tensor, items: &Tensor) -> Result<(Tensor, Tensor)> {
        let e = self.embeddings;
        let r = (e.user_active.index_select(users, 0)? * e.item_passive.index_select(items, 0)?)?
            .sum(1)?;
        let s = (e.user_passive.index_select(users, 0)? * e.item_active.index_select(items, 0)?)?
            .sum(1)?;
        Ok((r, s))
    }

    /// Batched scores for aligned `(user, item)` index tensors, `[B]`
    pub fn score_pairs(&self, users: &Tensor, items: &Tensor) -> Result<Tensor> {
        let (r, s) = self.pair_terms(users, items)?;
        Ok((r + s)?)
    }

    /// Score one `(query, candidate)` pair in the given direction
    pub fn score(&self, direction: Direction, query: usize, candidate: usize) -> Result<f32> {
        let (user, item) = direction.orient(query, candidate);
        let users = index_tensor(&[user], self.count(NodeType::User)?, &self.embeddings.user_active)?;
        let items = index_tensor(&[item], self.count(NodeType::Item)?, &self.embeddings.item_active)?;
        let scores = self.score_pairs(&users, &items)?.to_vec1::<f32>()?;
        Ok(scores[0])
    }

    /// Score every candidate for each query, `[queries, n_candidates]`
    ///
    /// From the user side this is `ua[q]·ipᵀ + up[q]·iaᵀ`; from the item side
    /// `ia[q]·upᵀ + ip[q]·uaᵀ`, the transpose of the same matrix.
    pub fn full_sort(&self, direction: Direction, queries: &[usize]) -> Result<Tensor> {
        let e = self.embeddings;
        let (q_first, c_first, q_second, c_second) = match direction {
            Direction::UserToItem => (
                &e.user_active,
                &e.item_passive,
                &e.user_passive,
                &e.item_active,
            ),
            Direction::ItemToUser => (
                &e.item_active,
                &e.user_passive,
                &e.item_passive,
                &e.user_active,
            ),
        };
        let ids = index_tensor(queries, self.count(direction.query_type())?, q_first)?;
        let first = q_first.index_select(&ids, 0)?.matmul(&c_first.t()?)?;
        let second = q_second.index_select(&ids, 0)?.matmul(&c_second.t()?)?;
        Ok((first + second)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn embeddings() -> PropagatedEmbeddings {
        let d = &Device::Cpu;
        PropagatedEmbeddings {
            user_active: Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], d).unwrap(),
            item_passive: Tensor::new(&[[2f32, 0.0], [0.0, 3.0], [1.0, 1.0]], d).unwrap(),
            user_passive: Tensor::new(&[[0.5f32, 0.5], [1.0, -1.0]], d).unwrap(),
            item_active: Tensor::new(&[[1f32, 1.0], [2.0, 0.0], [0.0, -1.0]], d).unwrap(),
        }
    }

    #[test]
    fn test_score_is_sum_of_two_terms() {
        let e = embeddings();
        let model = ScoringModel::new(&e);
        // user 0, item 1: <[1,0],[0,3]> + <[.5,.5],[2,0]> = 0 + 1
        assert_eq!(model.score(Direction::UserToItem, 0, 1).unwrap(), 1.0);
        // user 1, item 2: <[0,1],[1,1]> + <[1,-1],[0,-1]> = 1 + 1
        assert_eq!(model.score(Direction::UserToItem, 1, 2).unwrap(), 2.0);
    }

    #[test]
    fn test_direction_swap_gives_same_score() {
        let e = embeddings();
        let model = ScoringModel::new(&e);
        for user in 0..2 {
            for item in 0..3 {
                assert_eq!(
                    model.score(Direction::UserToItem, user, item).unwrap(),
                    model.score(Direction::ItemToUser, item, user).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_full_sort_is_transpose() {
        let e = embeddings();
        let model = ScoringModel::new(&e);
        let a = model.full_sort(Direction::UserToItem, &[0, 1]).unwrap();
        let b = model.full_sort(Direction::ItemToUser, &[0, 1, 2]).unwrap();
        assert_eq!(a.dims2().unwrap(), (2, 3));
        assert_eq!(b.dims2().unwrap(), (3, 2));
        let a = a.to_vec2::<f32>().unwrap();
        let b = b.to_vec2::<f32>().unwrap();
        for u in 0..2 {
            for i in 0..3 {
                assert!((a[u][i] - b[i][u]).abs() < 1e-6);
                assert!((a[u][i] - model.score(Direction::UserToItem, u, i).unwrap()).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_out_of_range_query() {
        let e = embeddings();
        let model = ScoringModel::new(&e);
        assert!(model.full_sort(Direction::UserToItem, &[2]).is_err());
        assert!(model.score(Direction::ItemToUser, 3, 0).is_err());
    }
}
