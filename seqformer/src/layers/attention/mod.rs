use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

mod mask;
pub use mask::{
    AttentionMask, AttentionMaskError, CausalMask, CausalMaskError, SelfAttentionMask,
    SelfAttentionMaskError,
};

mod multi_head;
pub use multi_head::{MultiHeadAttention, MultiHeadAttentionConfig, MultiHeadAttentionError};

mod sdpa;
pub use sdpa::{SDPAConfig, SDPAError, SDPA};

use crate::error::BoxedError;

/// Trait implemented by modules that perform attention scoring.
pub trait AttentionScorer {
    /// Apply attention scores to the given key, query and value.
    /// Sequence elements that are marked with `0` in the attention mask
    /// are ignored by the attention mechanism.
    ///
    /// * `query` - Query tensor.
    ///   *Shape:* `(batch_size, heads, query_len, width)`
    /// * `key` - Key tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    /// * `value` - Value tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    /// * `attention_mask` - Attention mask over the keys.
    ///   *Shape:* `(batch_size, key_len)`
    /// * `train` - Whether the model is trained.
    /// * `use_causal_mask` - Whether to apply a causal mask. With a causal mask,
    ///   a sequence element can only attend to preceding elements and itself.
    ///
    /// Returns: Attention values.
    /// *Shape:* `(batch_size, heads, query_len, width)`
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, BoxedError>;
}

/// Build an attention scorer module.
pub trait BuildAttentionScorer: Debug {
    /// Build an attention scorer.
    ///
    /// * `vb` - Variable builder used for attention parameters.
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn AttentionScorer>, BoxedError>;
}
