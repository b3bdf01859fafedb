use candle_core::{DType, IndexOp, Tensor};
use snafu::{ensure, ResultExt, Snafu};

use crate::util::tensor_ext::MinLike;

/// Errors for attention masks.
#[derive(Debug, Snafu)]
pub enum AttentionMaskError {
    #[snafu(display("Cannot concatenate masks"))]
    ConcatMasks { source: candle_core::Error },

    #[snafu(display("Cannot convert mask to an integer type"))]
    ConvertMask { source: candle_core::Error },

    #[snafu(display("Attention mask must be 2D, was {}D", n_dims))]
    InvalidDims { n_dims: usize },
}

/// Attention mask.
///
/// Sequence elements for which the corresponding mask element is set to
/// `0` are ignored during attention calculation. Guaranteed to be
/// a 2D array of the shape `(batch_size, seq_len)`.
#[derive(Clone, Debug)]
pub struct AttentionMask {
    bool_mask: Tensor,
}

impl AttentionMask {
    /// Create an input attention mask.
    ///
    /// * `bool_mask` - Boolean mask tensor. Non-integer masks are converted
    ///   to `u32`.
    ///   *Shape:* `(batch_size, seq_len)`
    pub fn new(bool_mask: Tensor) -> Result<Self, AttentionMaskError> {
        let n_dims = bool_mask.dims().len();
        ensure!(n_dims == 2, InvalidDimsSnafu { n_dims });
        let bool_mask = bool_mask.to_dtype(DType::U32).context(ConvertMaskSnafu)?;
        Ok(AttentionMask { bool_mask })
    }

    /// Get the boolean mask.
    ///
    /// *Shape:* `(batch_size, seq_len)`
    pub fn bool_mask(&self) -> &Tensor {
        &self.bool_mask
    }

    /// Extend the mask using another mask.
    pub fn extend(&self, other: &Self) -> Result<Self, AttentionMaskError> {
        Ok(AttentionMask {
            bool_mask: Tensor::cat(&[&self.bool_mask, &other.bool_mask], 1)
                .context(ConcatMasksSnafu)?,
        })
    }
}

/// Errors for self-attention masks.
#[derive(Debug, Snafu)]
pub enum SelfAttentionMaskError {
    #[snafu(display("Cannot apply logits mask"))]
    ApplyLogitsMask { source: candle_core::Error },

    #[snafu(display("Cannot convert attention mask to a self-attention mask"))]
    FromAttentionMask { source: candle_core::Error },

    #[snafu(display("Cannot intersect masks"))]
    IntersectMasks { source: candle_core::Error },
}

/// Self-attention mask.
///
/// A 4D attention mask that can be broadcast to the shape
/// `(batch_size, heads, query_len, key_len)`. Elements for which the
/// corresponding mask element is set to `0` are ignored during attention
/// calculation.
#[derive(Clone, Debug)]
pub struct SelfAttentionMask {
    bool_mask: Tensor,
}

impl TryFrom<&AttentionMask> for SelfAttentionMask {
    type Error = SelfAttentionMaskError;

    fn try_from(attention_mask: &AttentionMask) -> Result<Self, Self::Error> {
        let (batch_size, key_len) = attention_mask
            .bool_mask
            .dims2()
            .context(FromAttentionMaskSnafu)?;
        Ok(SelfAttentionMask {
            bool_mask: attention_mask
                .bool_mask
                .reshape((batch_size, 1, 1, key_len))
                .context(FromAttentionMaskSnafu)?,
        })
    }
}

impl SelfAttentionMask {
    /// Get the boolean mask.
    pub fn bool_mask(&self) -> &Tensor {
        &self.bool_mask
    }

    /// Use the attention mask to mask logits.
    ///
    /// * input - Tensor to which the mask is applied.
    ///   *Shape:* `(batch_size, heads, query_len, key_len)`
    ///
    /// Returns: Logits with the attention mask applied.
    /// *Shape:* `(batch_size, heads, query_len, key_len)`
    pub fn apply_logit_mask(&self, input: &Tensor) -> Result<Tensor, SelfAttentionMaskError> {
        // Underflows to -inf for more narrow floating point types, which
        // is ok for masking.
        let blocked_value = input.min_like().context(ApplyLogitsMaskSnafu)?;
        self.bool_mask
            .broadcast_as(input.shape())
            .and_then(|mask| mask.where_cond(input, &blocked_value))
            .context(ApplyLogitsMaskSnafu)
    }

    /// Intersect this attention mask with another attention mask.
    pub fn intersect(
        &self,
        other: &SelfAttentionMask,
    ) -> Result<SelfAttentionMask, SelfAttentionMaskError> {
        Ok(SelfAttentionMask {
            bool_mask: self
                .bool_mask
                .broadcast_mul(&other.bool_mask)
                .context(IntersectMasksSnafu)?,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum CausalMaskError {
    #[snafu(display("Cannot create causal mask"))]
    CreateMask { source: candle_core::Error },

    #[snafu(display("Key has invalid number of dimensions"))]
    KeyDim { source: candle_core::Error },

    #[snafu(display("Query has invalid number of dimensions"))]
    QueryDim { source: candle_core::Error },

    #[snafu(display("Query length {query_len} must not be larger than key length {key_len}"))]
    QueryLen { key_len: usize, query_len: usize },

    #[snafu(display("Cannot slice causal mask to key/query size"))]
    SliceMask { source: candle_core::Error },
}

/// Trait for creating causal masks.
pub trait CausalMask: Sized {
    type Error;

    /// Create a causal mask for the given query and key.
    ///
    /// A causal mask ensures that tokens cannot attend to succeeding tokens.
    ///
    /// * `query` - Query tensor.
    ///   *Shape:* `(batch_size, heads, query_len, width)`
    /// * `key` - Key tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    fn causal_mask(query: &Tensor, key: &Tensor) -> Result<Self, Self::Error>;
}

impl CausalMask for SelfAttentionMask {
    type Error = CausalMaskError;

    fn causal_mask(query: &Tensor, key: &Tensor) -> Result<Self, Self::Error> {
        let (_, _, query_len, _) = query.shape().dims4().context(QueryDimSnafu)?;
        let (_, _, key_len, _) = key.shape().dims4().context(KeyDimSnafu)?;

        // Slicing will fail down the line if the query length is greater than
        // the key length.
        ensure!(query_len <= key_len, QueryLenSnafu { key_len, query_len });

        let causal_mask = Tensor::tril2(key_len, DType::U32, key.device())
            .and_then(|mask| mask.reshape((1, 1, key_len, key_len)))
            .context(CreateMaskSnafu)?;
        Ok(Self {
            bool_mask: causal_mask
                .i((.., .., key_len - query_len..key_len, ..key_len))
                .context(SliceMaskSnafu)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use snafu::{report, ResultExt, Whatever};

    use super::{AttentionMask, CausalMask, SelfAttentionMask};

    #[test]
    fn attention_mask_must_be_2d() {
        let mask = Tensor::ones((1, 2, 3), DType::U32, &Device::Cpu).unwrap();
        assert!(AttentionMask::new(mask).is_err());
    }

    #[test]
    #[report]
    fn causal_mask_is_lower_triangular() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let query = Tensor::zeros((1, 1, 2, 4), DType::F32, &device)
            .whatever_context("Cannot create query")?;
        let key = Tensor::zeros((1, 1, 3, 4), DType::F32, &device)
            .whatever_context("Cannot create key")?;

        let mask = SelfAttentionMask::causal_mask(&query, &key)
            .whatever_context("Cannot create causal mask")?;
        let mask = mask
            .bool_mask()
            .squeeze(0)
            .and_then(|mask| mask.squeeze(0))
            .and_then(|mask| mask.to_vec2::<u32>())
            .whatever_context("Cannot convert mask")?;

        // The query covers the last two key positions.
        assert_eq!(mask, vec![vec![1, 1, 0], vec![1, 1, 1]]);

        assert!(SelfAttentionMask::causal_mask(&key, &query).is_err());

        Ok(())
    }

    #[test]
    #[report]
    fn masked_logits_are_blocked() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let mask = AttentionMask::new(
            Tensor::from_slice(&[1u32, 0, 1], (1, 3), &device)
                .whatever_context("Cannot create mask tensor")?,
        )
        .whatever_context("Cannot create attention mask")?;
        let mask = SelfAttentionMask::try_from(&mask)
            .whatever_context("Cannot create self-attention mask")?;

        let logits = Tensor::ones((1, 1, 1, 3), DType::F32, &device)
            .whatever_context("Cannot create logits")?;
        let masked = mask
            .apply_logit_mask(&logits)
            .whatever_context("Cannot apply mask")?
            .flatten_all()
            .and_then(|logits| logits.to_vec1::<f32>())
            .whatever_context("Cannot convert logits")?;

        assert_eq!(masked, vec![1.0, f32::MIN, 1.0]);

        Ok(())
    }
}
