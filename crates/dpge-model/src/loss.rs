//! Loss assembly
//!
//! Total loss = ranking + reg_weight · regularization
//! + mutual_weight · (user contrastive + item contrastive)
//!
//! Ranking compares `2·(r_pos + s_pos)` against the negative-item and
//! negative-user corruptions together, so one softplus covers both.

use crate::{ForwardOutput, LossConfig, PropagatedEmbeddings, Result, ScoringModel};
use candle_core::{Device, Tensor};
use serde::Serialize;
use std::collections::BTreeSet;

/// One mini-batch of oriented training quadruples
///
/// Row `k` is `(users[k], pos_items[k])` as the observed pair, with
/// `neg_items[k]` replacing the item and `neg_users[k]` replacing the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairBatch {
    /// Positive users
    pub users: Vec<usize>,
    /// Positive items
    pub pos_items: Vec<usize>,
    /// Corrupted items
    pub neg_items: Vec<usize>,
    /// Corrupted users
    pub neg_users: Vec<usize>,
}

impl PairBatch {
    /// Number of quadruples
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True when the batch holds no quadruples
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Append one quadruple
    pub fn push(&mut self, user: usize, pos_item: usize, neg_item: usize, neg_user: usize) {
        self.users.push(user);
        self.pos_items.push(pos_item);
        self.neg_items.push(neg_item);
        self.neg_users.push(neg_user);
    }
}

/// Per-component loss values for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LossBreakdown {
    /// Pairwise ranking loss
    pub ranking: f32,
    /// Unweighted L2 penalty
    pub regularization: f32,
    /// Unweighted user-side InfoNCE
    pub mutual_user: f32,
    /// Unweighted item-side InfoNCE
    pub mutual_item: f32,
    /// Weighted total
    pub total: f32,
}

impl LossBreakdown {
    /// True when every component is a finite number
    pub fn is_finite(&self) -> bool {
        [
            self.ranking,
            self.regularization,
            self.mutual_user,
            self.mutual_item,
            self.total,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

fn ids(indices: &[usize], device: &Device) -> Result<Tensor> {
    let v: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
    Ok(Tensor::from_vec(v, indices.len(), device)?)
}

fn scalar(t: &Tensor) -> Result<f32> {
    Ok(t.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?)
}

/// `log(1 + exp(x))`, computed without overflow
fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok((x.relu()? + tail)?)
}

/// Row-wise L2 normalization
fn normalize(x: &Tensor) -> Result<Tensor> {
    let norm = (x.sqr()?.sum_keepdim(1)? + 1e-12)?.sqrt()?;
    Ok(x.broadcast_div(&norm)?)
}

/// Combines the ranking, regularization and contrastive terms
#[derive(Debug, Clone)]
pub struct LossAssembler {
    config: LossConfig,
}

impl LossAssembler {
    /// Create an assembler with the given weights
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    /// Loss weights
    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Pairwise ranking loss, `mean(softplus(neg - pos))`
    pub fn ranking_loss(&self, batch: &PairBatch, propagated: &PropagatedEmbeddings) -> Result<Tensor> {
        let device = propagated.user_active.device();
        let scorer = ScoringModel::new(propagated);
        let users = ids(&batch.users, device)?;
        let pos_items = ids(&batch.pos_items, device)?;
        let neg_items = ids(&batch.neg_items, device)?;
        let neg_users = ids(&batch.neg_users, device)?;

        let pos = (scorer.score_pairs(&users, &pos_items)? * 2.0)?;
        let neg = (scorer.score_pairs(&users, &neg_items)?
            + scorer.score_pairs(&neg_users, &pos_items)?)?;
        Ok(softplus(&(neg - pos)?)?.mean_all()?)
    }

    /// `½ Σ ‖row‖² / batch` over the eight layer-0 rows each quadruple touches
    pub fn regularization(&self, batch: &PairBatch, ego: &PropagatedEmbeddings) -> Result<Tensor> {
        let device = ego.user_active.device();
        let user_ids = ids(&[batch.users.as_slice(), batch.neg_users.as_slice()].concat(), device)?;
        let item_ids = ids(&[batch.pos_items.as_slice(), batch.neg_items.as_slice()].concat(), device)?;

        let sq = |table: &Tensor, rows: &Tensor| -> Result<Tensor> {
            Ok(table.index_select(rows, 0)?.sqr()?.sum_all()?)
        };
        let total = (((sq(&ego.user_active, &user_ids)? + sq(&ego.user_passive, &user_ids)?)?
            + sq(&ego.item_passive, &item_ids)?)?
            + sq(&ego.item_active, &item_ids)?)?;
        Ok((total * (0.5 / batch.len().max(1) as f64))?)
    }

    /// InfoNCE between a population's active and passive views
    ///
    /// Row `k` of the similarity matrix has its positive on the diagonal and
    /// every other node's passive view as negatives.
    pub fn info_nce(&self, active: &Tensor, passive: &Tensor, rows: &[usize]) -> Result<Tensor> {
        let device = active.device();
        let unique: Vec<usize> = rows.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let idx = ids(&unique, device)?;
        let a = normalize(&active.index_select(&idx, 0)?)?;
        let p = normalize(&passive.index_select(&idx, 0)?)?;
        let logits = (a.matmul(&p.t()?)? / self.config.temperature)?;
        let labels = Tensor::arange(0u32, unique.len() as u32, device)?;
        Ok(candle_nn::loss::cross_entropy(&logits, &labels)?)
    }

    /// Assemble the total loss for one batch
    ///
    /// Returns the differentiable total together with scalar components.
    pub fn compute(&self, batch: &PairBatch, output: &ForwardOutput) -> Result<(Tensor, LossBreakdown)> {
        let propagated = &output.propagated;
        let ranking = self.ranking_loss(batch, propagated)?;
        let regularization = self.regularization(batch, &output.ego)?;
        let mutual_user = self.info_nce(&propagated.user_active, &propagated.user_passive, &batch.users)?;
        let mutual_item = self.info_nce(&propagated.item_active, &propagated.item_passive, &batch.pos_items)?;

        let mutual = (&mutual_user + &mutual_item)?;
        let total = ((&ranking + (&regularization * self.config.reg_weight)?)?
            + (mutual * self.config.mutual_weight)?)?;

        let breakdown = LossBreakdown {
            ranking: scalar(&ranking)?,
            regularization: scalar(&regularization)?,
            mutual_user: scalar(&mutual_user)?,
            mutual_item: scalar(&mutual_item)?,
            total: scalar(&total)?,
        };
        Ok((total, breakdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(rows: &[[f32; 2]; 2]) -> Tensor {
        Tensor::new(rows, &Device::Cpu).unwrap()
    }

    fn output() -> ForwardOutput {
        let e = PropagatedEmbeddings {
            user_active: tensor(&[[1.0, 0.0], [0.0, 1.0]]),
            item_passive: tensor(&[[1.0, 0.0], [0.0, 1.0]]),
            user_passive: tensor(&[[1.0, 0.0], [0.0, 1.0]]),
            item_active: tensor(&[[1.0, 0.0], [0.0, 1.0]]),
        };
        ForwardOutput {
            ego: e.clone(),
            propagated: e,
        }
    }

    fn batch() -> PairBatch {
        let mut b = PairBatch::default();
        b.push(0, 0, 1, 1);
        b
    }

    #[test]
    fn test_softplus_is_stable() {
        let x = Tensor::new(&[-100f32, 0.0, 100.0], &Device::Cpu).unwrap();
        let y = softplus(&x).unwrap().to_vec1::<f32>().unwrap();
        assert!(y[0] >= 0.0 && y[0] < 1e-6);
        assert!((y[1] - 2f32.ln()).abs() < 1e-6);
        assert!((y[2] - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_ranking_loss_hand_computed() {
        let assembler = LossAssembler::new(LossConfig::default());
        let out = output();
        // pos = 2·(1 + 1) = 4, neg = 0 + 0 → softplus(-4)
        let loss = scalar(&assembler.ranking_loss(&batch(), &out.propagated).unwrap()).unwrap();
        assert!((loss - (1.0 + (-4f32).exp()).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_regularization_hand_computed() {
        let assembler = LossAssembler::new(LossConfig::default());
        // eight unit rows, ½ · 8 / 1
        let reg = scalar(&assembler.regularization(&batch(), &output().ego).unwrap()).unwrap();
        assert!((reg - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_info_nce_deduplicates_rows() {
        let assembler = LossAssembler::new(LossConfig::default());
        let out = output();
        let a = assembler
            .info_nce(&out.propagated.user_active, &out.propagated.user_passive, &[0, 1, 0, 1])
            .unwrap();
        let b = assembler
            .info_nce(&out.propagated.user_active, &out.propagated.user_passive, &[1, 0])
            .unwrap();
        assert!((scalar(&a).unwrap() - scalar(&b).unwrap()).abs() < 1e-6);

        // A single node has nothing to contrast against.
        let single = assembler
            .info_nce(&out.propagated.user_active, &out.propagated.user_passive, &[1])
            .unwrap();
        assert!(scalar(&single).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_total_combines_weights() {
        let config = LossConfig {
            reg_weight: 0.5,
            mutual_weight: 2.0,
            temperature: 1.0,
        };
        let (total, parts) = LossAssembler::new(config).compute(&batch(), &output()).unwrap();
        let expected =
            parts.ranking + 0.5 * parts.regularization + 2.0 * (parts.mutual_user + parts.mutual_item);
        assert!((scalar(&total).unwrap() - expected).abs() < 1e-5);
        assert!(parts.is_finite());
    }
}
