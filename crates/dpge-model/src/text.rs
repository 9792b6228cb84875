//! Text co-attention encoder
//!
//! Turns each node's cached sentence vectors into one vector of the
//! embedding dimensionality:
//!
//! - items: project sentences, then self-attention pooling
//! - users: project sentences, co-attend each sentence against a partner
//!   item's projected sentences, run a masked recurrent aggregator, then a
//!   second self-attention pool
//!
//! Padding never contributes: every softmax is masked and the recurrent
//! state does not advance on padded positions. Nodes without text come out
//! as zero rows.

use crate::{ModelError, Result};
use candle_core::{DType, Device, Tensor, Var};
use dpge_store::{Initializer, NamedTensor, PaddedText, StoreError};
use rand::Rng;

const MASK_PENALTY: f64 = 1e9;

/// Repeat rows cyclically until the tensor has `rows` rows
///
/// Never truncates: a tensor that already has at least `rows` rows is
/// returned unchanged.
pub fn tile_rows(t: &Tensor, rows: usize) -> Result<Tensor> {
    let have = t.dim(0)?;
    if have >= rows || have == 0 {
        return Ok(t.clone());
    }
    let ids: Vec<u32> = (0..rows).map(|i| (i % have) as u32).collect();
    let ids = Tensor::from_vec(ids, rows, t.device())?;
    Ok(t.index_select(&ids, 0)?)
}

/// `[n, L, K] x [K, M] -> [n, L, M]`
fn matmul3(x: &Tensor, w: &Tensor) -> Result<Tensor> {
    let (n, l, k) = x.dims3()?;
    let m = w.dim(1)?;
    Ok(x.reshape((n * l, k))?.matmul(w)?.reshape((n, l, m))?)
}

/// Softmax over `dim` restricted to positions where `mask` is 1
///
/// Rows that are fully masked come out as all zeros.
fn masked_softmax(scores: &Tensor, mask: &Tensor, dim: usize) -> Result<Tensor> {
    let penalty = ((mask - 1.0)? * MASK_PENALTY)?;
    let weights = candle_nn::ops::softmax(&scores.broadcast_add(&penalty)?, dim)?;
    Ok(weights.broadcast_mul(mask)?)
}

/// Learned parameters of the text branch
pub struct TextCoAttentionEncoder {
    dim: usize,
    sentence_dim: usize,
    projection: Var,
    item_w1: Var,
    item_w2: Var,
    bilinear: Var,
    recurrent_wx: Var,
    recurrent_wh: Var,
    recurrent_bias: Var,
    user_w1: Var,
    user_w2: Var,
}

impl TextCoAttentionEncoder {
    /// Create an encoder with Glorot-initialized weights
    pub fn new<R: Rng + ?Sized>(
        sentence_dim: usize,
        dim: usize,
        hidden: usize,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        if sentence_dim == 0 || dim == 0 || hidden == 0 {
            return Err(ModelError::InvalidConfig(
                "text encoder sizes must be > 0".into(),
            ));
        }
        let mut weight = |rows: usize, cols: usize| -> Result<Var> {
            let t = Initializer::XavierUniform.tensor(rows, cols, &mut *rng, device)?;
            Ok(Var::from_tensor(&t)?)
        };
        let projection = weight(sentence_dim, dim)?;
        let item_w1 = weight(dim, hidden)?;
        let item_w2 = weight(hidden, 1)?;
        let bilinear = weight(dim, dim)?;
        let recurrent_wx = weight(dim, dim)?;
        let recurrent_wh = weight(dim, dim)?;
        let user_w1 = weight(dim, hidden)?;
        let user_w2 = weight(hidden, 1)?;
        let recurrent_bias = Var::zeros(dim, DType::F32, device)?;

        Ok(Self {
            dim,
            sentence_dim,
            projection,
            item_w1,
            item_w2,
            bilinear,
            recurrent_wx,
            recurrent_wh,
            recurrent_bias,
            user_w1,
            user_w2,
        })
    }

    /// Output dimensionality (the embedding size)
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Expected sentence vector dimensionality
    pub fn sentence_dim(&self) -> usize {
        self.sentence_dim
    }

    /// Parameters by stable name
    pub fn named_vars(&self) -> Vec<(&'static str, &Var)> {
        vec![
            ("projection", &self.projection),
            ("item_attention_w1", &self.item_w1),
            ("item_attention_w2", &self.item_w2),
            ("bilinear", &self.bilinear),
            ("recurrent_wx", &self.recurrent_wx),
            ("recurrent_wh", &self.recurrent_wh),
            ("recurrent_bias", &self.recurrent_bias),
            ("user_attention_w1", &self.user_w1),
            ("user_attention_w2", &self.user_w2),
        ]
    }

    /// Copy all parameters out for a checkpoint
    pub fn export(&self) -> Result<Vec<NamedTensor>> {
        self.named_vars()
            .into_iter()
            .map(|(name, var)| Ok(NamedTensor::from_tensor(name, var.as_tensor())?))
            .collect()
    }

    /// Overwrite parameters from checkpointed tensors
    ///
    /// Every parameter must be present with a matching element count; nothing
    /// is written unless all of them are.
    pub fn load(&self, params: &[NamedTensor]) -> Result<()> {
        let mut values = Vec::new();
        for (name, var) in self.named_vars() {
            let saved = params.iter().find(|p| p.name == name).ok_or_else(|| {
                StoreError::InvalidData(format!("checkpoint lacks text parameter {}", name))
            })?;
            let shape = var.as_tensor().shape().clone();
            if saved.data.len() != shape.elem_count() {
                return Err(StoreError::DimensionMismatch {
                    expected: shape.elem_count(),
                    found: saved.data.len(),
                }
                .into());
            }
            let value = saved.to_tensor(var.as_tensor().device())?.reshape(shape)?;
            values.push((var, value));
        }
        for (var, value) in values {
            var.set(&value)?;
        }
        Ok(())
    }

    fn project(&self, sentences: &Tensor) -> Result<Tensor> {
        let b = sentences.dim(2)?;
        if b != self.sentence_dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.sentence_dim,
                found: b,
            }
            .into());
        }
        matmul3(sentences, self.projection.as_tensor())
    }

    /// Self-attention pooling `[n, L, D] -> [n, D]`
    fn attention_pool(&self, reps: &Tensor, mask: &Tensor, w1: &Var, w2: &Var) -> Result<Tensor> {
        let hidden = matmul3(reps, w1.as_tensor())?.tanh()?;
        let scores = matmul3(&hidden, w2.as_tensor())?.squeeze(2)?;
        let weights = masked_softmax(&scores, mask, 1)?;
        Ok(reps.broadcast_mul(&weights.unsqueeze(2)?)?.sum(1)?)
    }

    /// Project and pool item sentences
    ///
    /// Returns the per-sentence representations `[nI, Li, D]` (consumed by
    /// user co-attention) and the pooled vectors `[nI, D]`.
    pub fn encode_items(&self, items: &PaddedText) -> Result<(Tensor, Tensor)> {
        let (n, len, _) = items.sentences.dims3()?;
        if n == 0 {
            let device = items.sentences.device();
            return Ok((
                Tensor::zeros((0, len, self.dim), DType::F32, device)?,
                Tensor::zeros((0, self.dim), DType::F32, device)?,
            ));
        }
        let reps = self.project(&items.sentences)?;
        let pooled = self.attention_pool(&reps, &items.mask, &self.item_w1, &self.item_w2)?;
        let pooled = pooled.broadcast_mul(&items.present.unsqueeze(1)?)?;
        Ok((reps, pooled))
    }

    /// Co-attend own sentences against partner sentences
    ///
    /// `own` is `[n, Lu, D]`, `partner` is `[m, Lp, D]` with mask `[m, Lp]`.
    /// When `n != m` the smaller side is tiled cyclically to the larger, so
    /// the output has `max(n, m)` rows of `[Lu, D]`. Each own sentence gets
    /// the attention-weighted combination of partner sentences added to it.
    pub fn co_attend(&self, own: &Tensor, partner: &Tensor, partner_mask: &Tensor) -> Result<Tensor> {
        let rows = own.dim(0)?.max(partner.dim(0)?);
        let own = tile_rows(own, rows)?;
        let partner = tile_rows(partner, rows)?;
        let partner_mask = tile_rows(partner_mask, rows)?;

        let compat = matmul3(&own, self.bilinear.as_tensor())?;
        let scores = compat.matmul(&partner.transpose(1, 2)?.contiguous()?)?;
        let weights = masked_softmax(&scores, &partner_mask.unsqueeze(1)?, 2)?;
        let attended = weights.matmul(&partner.contiguous()?)?;
        Ok((own + attended)?)
    }

    /// Masked Elman recurrence over `[n, L, D]`, returning every state
    fn recurrent(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (n, len, _) = x.dims3()?;
        let mut h = Tensor::zeros((n, self.dim), DType::F32, x.device())?;
        let mut states = Vec::with_capacity(len);
        for t in 0..len {
            let x_t = x.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            let m_t = mask.narrow(1, t, 1)?;
            let candidate = (x_t.matmul(self.recurrent_wx.as_tensor())?
                + h.matmul(self.recurrent_wh.as_tensor())?)?
            .broadcast_add(self.recurrent_bias.as_tensor())?
            .tanh()?;
            h = (candidate.broadcast_mul(&m_t)? + h.broadcast_mul(&m_t.affine(-1.0, 1.0)?)?)?;
            states.push(h.clone());
        }
        Ok(Tensor::stack(&states, 1)?)
    }

    /// Encode users into `[nU, D]`
    ///
    /// `partners[u]` names the item whose sentences user `u` co-attends
    /// against. Users without a partner skip co-attention and aggregate their
    /// own projected sentences directly.
    pub fn encode_users(
        &self,
        users: &PaddedText,
        item_reps: &Tensor,
        item_mask: &Tensor,
        partners: &[Option<usize>],
    ) -> Result<Tensor> {
        let (n, _, _) = users.sentences.dims3()?;
        if n == 0 {
            return Ok(Tensor::zeros((0, self.dim), DType::F32, users.sentences.device())?);
        }
        let own = self.project(&users.sentences)?;
        let n_items = item_reps.dim(0)?;

        let attended = if n_items > 0 && partners.iter().any(Option::is_some) {
            let device = own.device();
            let ids: Vec<u32> = (0..n)
                .map(|u| partners.get(u).copied().flatten().unwrap_or(0).min(n_items - 1) as u32)
                .collect();
            let valid: Vec<f32> = (0..n)
                .map(|u| match partners.get(u).copied().flatten() {
                    Some(i) if i < n_items => 1.0,
                    _ => 0.0,
                })
                .collect();
            let ids = Tensor::from_vec(ids, n, device)?;
            let valid = Tensor::from_vec(valid, (n, 1), device)?;
            let partner = item_reps.index_select(&ids, 0)?;
            let partner_mask = item_mask.index_select(&ids, 0)?.broadcast_mul(&valid)?;
            self.co_attend(&own, &partner, &partner_mask)?
        } else {
            own
        };

        let states = self.recurrent(&attended, &users.mask)?;
        let pooled = self.attention_pool(&states, &users.mask, &self.user_w1, &self.user_w2)?;
        Ok(pooled.broadcast_mul(&users.present.unsqueeze(1)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpge_domain::{NodeCounts, NodeType};
    use dpge_store::{seeded_rng, TextCache};

    fn encoder() -> TextCoAttentionEncoder {
        TextCoAttentionEncoder::new(3, 4, 5, &mut seeded_rng(1), &Device::Cpu).unwrap()
    }

    fn cache() -> TextCache {
        let mut cache = TextCache::new(3, NodeCounts::new(3, 2));
        cache
            .set_if_absent(NodeType::User, 0, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
            .unwrap();
        cache.set_if_absent(NodeType::User, 2, vec![vec![0.0, 0.0, 1.0]]).unwrap();
        cache
            .set_if_absent(NodeType::Item, 0, vec![vec![0.5, 0.5, 0.0], vec![0.0, 0.5, 0.5]])
            .unwrap();
        cache
    }

    #[test]
    fn test_tile_rows_cycles() {
        let t = Tensor::new(&[[1f32], [2.0]], &Device::Cpu).unwrap();
        let tiled = tile_rows(&t, 5).unwrap();
        assert_eq!(
            tiled.to_vec2::<f32>().unwrap(),
            vec![vec![1.0], vec![2.0], vec![1.0], vec![2.0], vec![1.0]]
        );
        assert_eq!(tile_rows(&t, 1).unwrap().dim(0).unwrap(), 2);
    }

    #[test]
    fn test_masked_softmax_ignores_padding() {
        let scores = Tensor::new(&[[5f32, 1.0, 3.0], [0.0, 0.0, 0.0]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1f32, 0.0, 1.0], [0.0, 0.0, 0.0]], &Device::Cpu).unwrap();
        let w = masked_softmax(&scores, &mask, 1).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(w[0][1], 0.0);
        assert!((w[0][0] + w[0][2] - 1.0).abs() < 1e-5);
        assert_eq!(w[1], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_text_is_zero() {
        let enc = encoder();
        let cache = cache();
        let items = cache.padded(NodeType::Item, &Device::Cpu).unwrap();
        let users = cache.padded(NodeType::User, &Device::Cpu).unwrap();

        let (reps, pooled) = enc.encode_items(&items).unwrap();
        assert_eq!(reps.dims3().unwrap(), (2, 2, 4));
        let pooled = pooled.to_vec2::<f32>().unwrap();
        assert!(pooled[0].iter().any(|v| *v != 0.0));
        assert_eq!(pooled[1], vec![0.0; 4]);

        let out = enc
            .encode_users(&users, &reps, &items.mask, &[Some(0), Some(1), None])
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert!(out[0].iter().any(|v| *v != 0.0));
        assert_eq!(out[1], vec![0.0; 4]);
        assert!(out[2].iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_co_attend_tiles_smaller_batch() {
        let enc = encoder();
        let own = Tensor::ones((3, 2, 4), DType::F32, &Device::Cpu).unwrap();
        let partner = Tensor::ones((1, 4, 4), DType::F32, &Device::Cpu).unwrap();
        let mask = Tensor::ones((1, 4), DType::F32, &Device::Cpu).unwrap();
        let out = enc.co_attend(&own, &partner, &mask).unwrap();
        assert_eq!(out.dims3().unwrap(), (3, 2, 4));

        let one = Tensor::ones((1, 2, 4), DType::F32, &Device::Cpu).unwrap();
        let many = Tensor::ones((3, 4, 4), DType::F32, &Device::Cpu).unwrap();
        let many_mask = Tensor::ones((3, 4), DType::F32, &Device::Cpu).unwrap();
        let out = enc.co_attend(&one, &many, &many_mask).unwrap();
        assert_eq!(out.dims3().unwrap(), (3, 2, 4));
    }

    #[test]
    fn test_export_and_load() {
        let a = encoder();
        let b = TextCoAttentionEncoder::new(3, 4, 5, &mut seeded_rng(2), &Device::Cpu).unwrap();
        let params = a.export().unwrap();
        assert_eq!(params.len(), 9);
        b.load(&params).unwrap();
        for ((_, va), (_, vb)) in a.named_vars().into_iter().zip(b.named_vars()) {
            assert_eq!(
                va.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap(),
                vb.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap()
            );
        }
        assert!(b.load(&params[1..]).is_err());
    }

    #[test]
    fn test_sentence_dim_checked() {
        let enc = encoder();
        let wrong = TextCache::new(5, NodeCounts::new(0, 1));
        let items = wrong.padded(NodeType::Item, &Device::Cpu).unwrap();
        assert!(enc.encode_items(&items).is_err());
    }
}
