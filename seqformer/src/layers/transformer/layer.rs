use candle_core::{ModuleT, Tensor};
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildDecoderLayer, BuildEncoderLayer, DecoderLayer, EncoderLayer};
use crate::error::BoxedError;
use crate::layers::attention::{
    AttentionMask, MultiHeadAttention, MultiHeadAttentionConfig, MultiHeadAttentionError,
};
use crate::layers::build_module::BuildModule;
use crate::layers::feedforward::PointwiseFeedForwardConfig;
use crate::layers::identity::Identity;

/// Transformer layer configuration.
///
/// The same configuration builds encoder and decoder layers. Post-norm
/// layers (_Vaswani et al., 2017_) set the residual layer norms, pre-norm
/// layers set the input layer norms.
#[derive(Debug)]
pub struct TransformerLayerConfig {
    attention: MultiHeadAttentionConfig,
    attn_input_layer_norm: Box<dyn BuildModule>,
    attn_residual_layer_norm: Box<dyn BuildModule>,
    cross_attn_input_layer_norm: Box<dyn BuildModule>,
    cross_attn_residual_layer_norm: Box<dyn BuildModule>,
    feedforward: PointwiseFeedForwardConfig,
    ffn_input_layer_norm: Box<dyn BuildModule>,
    ffn_residual_layer_norm: Box<dyn BuildModule>,
}

impl TransformerLayerConfig {
    /// Attention layer configuration, used for self-attention and for
    /// cross-attention in decoder layers.
    ///
    /// Default: `MultiHeadAttentionConfig::default()`
    pub fn attention(mut self, attention: MultiHeadAttentionConfig) -> Self {
        self.attention = attention;
        self
    }

    /// Layer norm applied to the input of self-attention.
    ///
    /// Default: `Identity`
    pub fn attn_input_layer_norm(mut self, attn_input_layer_norm: Box<dyn BuildModule>) -> Self {
        self.attn_input_layer_norm = attn_input_layer_norm;
        self
    }

    /// Layer norm applied after the self-attention residual connection.
    ///
    /// Default: `Identity`
    pub fn attn_residual_layer_norm(
        mut self,
        attn_residual_layer_norm: Box<dyn BuildModule>,
    ) -> Self {
        self.attn_residual_layer_norm = attn_residual_layer_norm;
        self
    }

    /// Layer norm applied to the input of cross-attention.
    ///
    /// Default: `Identity`
    pub fn cross_attn_input_layer_norm(
        mut self,
        cross_attn_input_layer_norm: Box<dyn BuildModule>,
    ) -> Self {
        self.cross_attn_input_layer_norm = cross_attn_input_layer_norm;
        self
    }

    /// Layer norm applied after the cross-attention residual connection.
    ///
    /// Default: `Identity`
    pub fn cross_attn_residual_layer_norm(
        mut self,
        cross_attn_residual_layer_norm: Box<dyn BuildModule>,
    ) -> Self {
        self.cross_attn_residual_layer_norm = cross_attn_residual_layer_norm;
        self
    }

    /// Feed-forward layer configuration.
    ///
    /// Default: `PointwiseFeedForwardConfig::default()`
    pub fn feedforward(mut self, feedforward: PointwiseFeedForwardConfig) -> Self {
        self.feedforward = feedforward;
        self
    }

    /// Layer norm applied to the input of the feed-forward layer.
    ///
    /// Default: `Identity`
    pub fn ffn_input_layer_norm(mut self, ffn_input_layer_norm: Box<dyn BuildModule>) -> Self {
        self.ffn_input_layer_norm = ffn_input_layer_norm;
        self
    }

    /// Layer norm applied after the feed-forward residual connection.
    ///
    /// Default: `Identity`
    pub fn ffn_residual_layer_norm(
        mut self,
        ffn_residual_layer_norm: Box<dyn BuildModule>,
    ) -> Self {
        self.ffn_residual_layer_norm = ffn_residual_layer_norm;
        self
    }

    fn build_residual(
        &self,
        vb: &VarBuilder,
        input_layer_norm: &dyn BuildModule,
        input_name: &str,
        residual_layer_norm: &dyn BuildModule,
        residual_name: &str,
    ) -> Result<Residual, TransformerLayerError> {
        Ok(Residual {
            input_layer_norm: input_layer_norm
                .build(vb.push_prefix(input_name))
                .context(BuildLayerNormSnafu)?,
            residual_layer_norm: residual_layer_norm
                .build(vb.push_prefix(residual_name))
                .context(BuildLayerNormSnafu)?,
        })
    }

    fn build_self_attention(
        &self,
        vb: &VarBuilder,
    ) -> Result<(MultiHeadAttention, Residual), TransformerLayerError> {
        Ok((
            self.attention
                .build(vb.push_prefix("self_attention"))
                .context(BuildAttentionSnafu)?,
            self.build_residual(
                vb,
                self.attn_input_layer_norm.as_ref(),
                "attn_input_layer_norm",
                self.attn_residual_layer_norm.as_ref(),
                "attn_residual_layer_norm",
            )?,
        ))
    }

    fn build_feedforward(
        &self,
        vb: &VarBuilder,
    ) -> Result<(Box<dyn ModuleT>, Residual), TransformerLayerError> {
        Ok((
            self.feedforward
                .build(vb.push_prefix("ffn"))
                .context(BuildFeedForwardSnafu)?,
            self.build_residual(
                vb,
                self.ffn_input_layer_norm.as_ref(),
                "ffn_input_layer_norm",
                self.ffn_residual_layer_norm.as_ref(),
                "ffn_residual_layer_norm",
            )?,
        ))
    }
}

impl Default for TransformerLayerConfig {
    fn default() -> Self {
        Self {
            attention: MultiHeadAttentionConfig::default(),
            attn_input_layer_norm: Box::new(Identity),
            attn_residual_layer_norm: Box::new(Identity),
            cross_attn_input_layer_norm: Box::new(Identity),
            cross_attn_residual_layer_norm: Box::new(Identity),
            feedforward: PointwiseFeedForwardConfig::default(),
            ffn_input_layer_norm: Box::new(Identity),
            ffn_residual_layer_norm: Box::new(Identity),
        }
    }
}

impl BuildEncoderLayer for TransformerLayerConfig {
    fn build_encoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn EncoderLayer>, BoxedError> {
        let (self_attention, attn_residual) = self.build_self_attention(&vb)?;
        let (ffn, ffn_residual) = self.build_feedforward(&vb)?;

        Ok(Box::new(TransformerEncoderLayer {
            attn_residual,
            ffn,
            ffn_residual,
            self_attention,
        }))
    }
}

impl BuildDecoderLayer for TransformerLayerConfig {
    fn build_decoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn DecoderLayer>, BoxedError> {
        let (self_attention, attn_residual) = self.build_self_attention(&vb)?;
        let cross_attention = self
            .attention
            .build(vb.push_prefix("cross_attention"))
            .context(BuildAttentionSnafu)?;
        let cross_attn_residual = self.build_residual(
            &vb,
            self.cross_attn_input_layer_norm.as_ref(),
            "cross_attn_input_layer_norm",
            self.cross_attn_residual_layer_norm.as_ref(),
            "cross_attn_residual_layer_norm",
        )?;
        let (ffn, ffn_residual) = self.build_feedforward(&vb)?;

        Ok(Box::new(TransformerDecoderLayer {
            attn_residual,
            cross_attention,
            cross_attn_residual,
            ffn,
            ffn_residual,
            self_attention,
        }))
    }
}

/// Errors for transformer layers.
#[derive(Debug, Snafu)]
pub enum TransformerLayerError {
    #[snafu(display("Cannot build attention layer"))]
    BuildAttention { source: MultiHeadAttentionError },

    #[snafu(display("Cannot build feed-forward layer"))]
    BuildFeedForward { source: BoxedError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot apply cross-attention"))]
    CrossAttention { source: MultiHeadAttentionError },

    #[snafu(display("Cannot apply point-wise feed-forward layer"))]
    FeedForward { source: candle_core::Error },

    #[snafu(display("Cannot apply layer norm"))]
    LayerNorm { source: candle_core::Error },

    #[snafu(display("Cannot apply residual connection"))]
    Residual { source: candle_core::Error },

    #[snafu(display("Cannot apply self-attention"))]
    SelfAttention { source: MultiHeadAttentionError },
}

/// Residual connection around a sublayer.
///
/// Computes `residual_norm(x + f(input_norm(x)))`.
struct Residual {
    input_layer_norm: Box<dyn ModuleT>,
    residual_layer_norm: Box<dyn ModuleT>,
}

impl Residual {
    fn forward_t<F>(
        &self,
        input: &Tensor,
        train: bool,
        sublayer: F,
    ) -> Result<Tensor, TransformerLayerError>
    where
        F: FnOnce(&Tensor) -> Result<Tensor, TransformerLayerError>,
    {
        let sublayer_input = self
            .input_layer_norm
            .forward_t(input, train)
            .context(LayerNormSnafu)?;
        let sublayer_output = sublayer(&sublayer_input)?;
        (input + sublayer_output)
            .and_then(|xs| self.residual_layer_norm.forward_t(&xs, train))
            .context(ResidualSnafu)
    }
}

/// Transformer encoder layer.
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
pub struct TransformerEncoderLayer {
    attn_residual: Residual,
    ffn: Box<dyn ModuleT>,
    ffn_residual: Residual,
    self_attention: MultiHeadAttention,
}

impl EncoderLayer for TransformerEncoderLayer {
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError> {
        let hidden = self.attn_residual.forward_t(input, train, |xs| {
            self.self_attention
                .forward_t(xs, None, attention_mask, train, false)
                .context(SelfAttentionSnafu)
        })?;

        Ok(self.ffn_residual.forward_t(&hidden, train, |xs| {
            self.ffn.forward_t(xs, train).context(FeedForwardSnafu)
        })?)
    }
}

/// Transformer decoder layer.
///
/// Causal self-attention, followed by attention over the encoder output
/// and a feed-forward layer.
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
pub struct TransformerDecoderLayer {
    attn_residual: Residual,
    cross_attention: MultiHeadAttention,
    cross_attn_residual: Residual,
    ffn: Box<dyn ModuleT>,
    ffn_residual: Residual,
    self_attention: MultiHeadAttention,
}

impl DecoderLayer for TransformerDecoderLayer {
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        encoder_hidden: &Tensor,
        encoder_mask: &AttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError> {
        let hidden = self.attn_residual.forward_t(input, train, |xs| {
            self.self_attention
                .forward_t(xs, None, attention_mask, train, true)
                .context(SelfAttentionSnafu)
        })?;

        let hidden = self.cross_attn_residual.forward_t(&hidden, train, |xs| {
            self.cross_attention
                .forward_t(xs, Some(encoder_hidden), encoder_mask, train, false)
                .context(CrossAttentionSnafu)
        })?;

        Ok(self.ffn_residual.forward_t(&hidden, train, |xs| {
            self.ffn.forward_t(xs, train).context(FeedForwardSnafu)
        })?)
    }
}
