use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{AttentionMask, AttentionScorer, BuildAttentionScorer, SDPAConfig};
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Multi-head attention configuration.
#[derive(Debug)]
pub struct MultiHeadAttentionConfig {
    attention_scorer: Box<dyn BuildAttentionScorer>,
    dropout: Box<dyn BuildModule>,
    hidden_width: usize,
    n_heads: usize,
    use_bias: bool,
}

impl MultiHeadAttentionConfig {
    /// Attention scorer.
    ///
    /// Default: `SDPAConfig::default()`
    pub fn attention_scorer(mut self, attention_scorer: Box<dyn BuildAttentionScorer>) -> Self {
        self.attention_scorer = attention_scorer;
        self
    }

    /// Dropout applied to the output of the attention layer.
    ///
    /// Default: `Identity`
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Hidden width of the layer input and output.
    ///
    /// Default: `512`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `8`
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Use bias in the query, key, value, and output projections.
    ///
    /// Default: `true`
    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Build a multi-head attention layer.
    pub fn build(&self, vb: VarBuilder) -> Result<MultiHeadAttention, MultiHeadAttentionError> {
        ensure!(
            self.n_heads > 0 && self.hidden_width % self.n_heads == 0,
            InvalidHeadsSnafu {
                hidden_width: self.hidden_width,
                n_heads: self.n_heads
            }
        );

        let linear_ctor = if self.use_bias {
            linear
        } else {
            linear_no_bias
        };
        let projection = |name: &str| {
            linear_ctor(self.hidden_width, self.hidden_width, vb.push_prefix(name))
                .context(ConstructionSnafu)
        };

        Ok(MultiHeadAttention {
            attention_scorer: self
                .attention_scorer
                .build(vb.push_prefix("scorer"))
                .context(BuildAttentionScorerSnafu)?,
            dropout: self
                .dropout
                .build(vb.push_prefix("dropout"))
                .context(BuildDropoutSnafu)?,
            n_heads: self.n_heads,
            query: projection("query")?,
            key: projection("key")?,
            value: projection("value")?,
            output: projection("output")?,
        })
    }
}

impl Default for MultiHeadAttentionConfig {
    fn default() -> Self {
        Self {
            attention_scorer: Box::<SDPAConfig>::default(),
            dropout: Box::new(Identity),
            hidden_width: 512,
            n_heads: 8,
            use_bias: true,
        }
    }
}

/// Errors for multi-head attention.
#[derive(Debug, Snafu)]
pub enum MultiHeadAttentionError {
    #[snafu(display("Cannot apply attention scorer"))]
    AttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build attention scorer"))]
    BuildAttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot combine heads"))]
    CombineHeads { source: candle_core::Error },

    #[snafu(display("Cannot construct layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display(
        "Hidden width {hidden_width} must be a non-zero multiple of the number of heads {n_heads}"
    ))]
    InvalidHeads { hidden_width: usize, n_heads: usize },

    #[snafu(display("Cannot apply output layer"))]
    Output { source: candle_core::Error },

    #[snafu(display("Cannot calculate key, query, or value"))]
    Qkv { source: candle_core::Error },

    #[snafu(display("Cannot split heads"))]
    SplitHeads { source: candle_core::Error },
}

/// Multi-head attention layer.
///
/// The inputs are projected to queries, keys, and values, which are split
/// into heads that attend independently. The outputs of the heads are
/// concatenated and projected back to the hidden width.
///
/// The layer is used both for self-attention and for the attention of
/// the decoder over the encoder output.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct MultiHeadAttention {
    attention_scorer: Box<dyn AttentionScorer>,
    dropout: Box<dyn ModuleT>,
    n_heads: usize,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
}

impl MultiHeadAttention {
    /// Apply attention.
    ///
    /// * `input` - Input to compute the queries from.
    ///   *Shape:* `(batch_size, query_len, width)`
    /// * `key_value` - Input to compute keys and values from. When `None`,
    ///   `input` is used (self-attention).
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `attention_mask` - Mask over the keys. Sequence elements for which
    ///   the corresponding mask element is set to `0` are ignored.
    ///   *Shape:* `(batch_size, key_len)`
    /// * `train` - Whether the model is trained.
    /// * `use_causal_mask` - Mask out succeeding sequence elements.
    ///
    /// Returns: Attention output.
    /// *Shape:* `(batch_size, query_len, width)`
    pub fn forward_t(
        &self,
        input: &Tensor,
        key_value: Option<&Tensor>,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, MultiHeadAttentionError> {
        let key_value = key_value.unwrap_or(input);

        let query = self
            .query
            .forward(input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let key = self
            .key
            .forward(key_value)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let value = self
            .value
            .forward(key_value)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;

        let attn = self
            .attention_scorer
            .forward(&query, &key, &value, attention_mask, train, use_causal_mask)
            .context(AttentionScorerSnafu)?
            .combine_heads()?;

        self.output
            .forward(&attn)
            .and_then(|xs| self.dropout.forward_t(&xs, train))
            .context(OutputSnafu)
    }
}

trait CombineHeads {
    fn combine_heads(&self) -> Result<Tensor, MultiHeadAttentionError>;
}

impl CombineHeads for Tensor {
    fn combine_heads(&self) -> Result<Tensor, MultiHeadAttentionError> {
        let (batch_size, n_heads, seq_len, head_width) =
            self.dims4().context(CombineHeadsSnafu)?;
        self.transpose(1, 2)
            .and_then(|heads| heads.reshape((batch_size, seq_len, n_heads * head_width)))
            .context(CombineHeadsSnafu)
    }
}

trait SplitHeads {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, MultiHeadAttentionError>;
}

impl SplitHeads for Tensor {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, MultiHeadAttentionError> {
        let (batch_size, seq_len, model_width) = self.dims3().context(SplitHeadsSnafu)?;
        let head_width = model_width / n_heads;
        self.reshape((batch_size, seq_len, n_heads, head_width))
            .and_then(|heads| heads.transpose(1, 2))
            .context(SplitHeadsSnafu)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, ResultExt, Whatever};

    use crate::layers::attention::{AttentionMask, MultiHeadAttentionConfig};
    use crate::util::device::tests::test_devices;
    use crate::util::tests::PseudoRandom;

    #[test]
    fn multi_head_attention_rejects_indivisible_width() {
        let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &Device::Cpu);
        assert!(MultiHeadAttentionConfig::default()
            .hidden_width(10)
            .n_heads(3)
            .build(vb)
            .is_err());
    }

    #[test]
    #[report]
    fn multi_head_attention_cross_attention_shapes() -> Result<(), Whatever> {
        for device in test_devices() {
            let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &device);
            let attention = MultiHeadAttentionConfig::default()
                .hidden_width(8)
                .n_heads(2)
                .build(vb)
                .whatever_context("Cannot build attention")?;

            let input = Tensor::pseudo_random(&[2, 3, 8], &device);
            let memory = Tensor::pseudo_random(&[2, 5, 8], &device);
            let mask = AttentionMask::new(
                Tensor::ones((2, 5), DType::U32, &device)
                    .whatever_context("Cannot create mask")?,
            )
            .whatever_context("Cannot create attention mask")?;

            let output = attention
                .forward_t(&input, Some(&memory), &mask, false, false)
                .whatever_context("Cannot apply attention")?;
            assert_eq!(output.dims(), &[2, 3, 8]);
        }

        Ok(())
    }

    #[test]
    #[report]
    fn causal_self_attention_ignores_future_pieces() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &device);
        let attention = MultiHeadAttentionConfig::default()
            .hidden_width(8)
            .n_heads(2)
            .build(vb)
            .whatever_context("Cannot build attention")?;

        let input = Tensor::pseudo_random(&[1, 4, 8], &device);
        let mask = AttentionMask::new(
            Tensor::ones((1, 4), DType::U32, &device).whatever_context("Cannot create mask")?,
        )
        .whatever_context("Cannot create attention mask")?;
        let output = attention
            .forward_t(&input, None, &mask, false, true)
            .whatever_context("Cannot apply attention")?;

        // Changing the last piece must not change the outputs of the
        // preceding pieces.
        let prefix = input.i((.., ..3, ..)).whatever_context("Cannot slice")?;
        let changed = Tensor::cat(
            &[
                &prefix,
                &Tensor::ones((1, 1, 8), DType::F32, &device)
                    .whatever_context("Cannot create piece")?,
            ],
            1,
        )
        .whatever_context("Cannot concatenate")?;
        let changed_output = attention
            .forward_t(&changed, None, &mask, false, true)
            .whatever_context("Cannot apply attention")?;

        crate::util::tests::assert_tensor_eq_::<f32>(
            output.i((.., ..3, ..)).whatever_context("Cannot slice")?,
            changed_output
                .i((.., ..3, ..))
                .whatever_context("Cannot slice")?,
            approx::Relative::default().epsilon(1e-5f32),
        );

        Ok(())
    }
}
