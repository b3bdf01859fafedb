//! Transformer decoder.
use candle_core::{ModuleT, Tensor};
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildArchitecture, BuildDecoderLayer, BuildEmbeddings};
use crate::architectures::{Decoder, DecoderLayer, DecoderOutput, Embeddings};
use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;
use crate::layers::transformer::{TransformerEmbeddingsConfig, TransformerLayerConfig};

/// Transformer decoder configuration.
#[derive(Debug)]
pub struct TransformerDecoderConfig {
    embeddings: Box<dyn BuildEmbeddings>,
    layer: Box<dyn BuildDecoderLayer>,
    n_hidden_layers: usize,
    output_layer_norm: Box<dyn BuildModule>,
}

impl TransformerDecoderConfig {
    /// Decoder embeddings.
    ///
    /// Default: `TransformerEmbeddingsConfig::default()`
    pub fn embeddings(mut self, embeddings: Box<dyn BuildEmbeddings>) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Decoder layer.
    ///
    /// Default: `TransformerLayerConfig::default()`
    pub fn layer(mut self, layer: Box<dyn BuildDecoderLayer>) -> Self {
        self.layer = layer;
        self
    }

    /// Number of hidden layers.
    ///
    /// Default: `6`
    pub fn n_hidden_layers(mut self, n_hidden_layers: usize) -> Self {
        self.n_hidden_layers = n_hidden_layers;
        self
    }

    /// Output layer normalization module.
    ///
    /// Default: `Identity`
    pub fn output_layer_norm(mut self, output_layer_norm: Box<dyn BuildModule>) -> Self {
        self.output_layer_norm = output_layer_norm;
        self
    }
}

impl Default for TransformerDecoderConfig {
    fn default() -> Self {
        Self {
            embeddings: Box::<TransformerEmbeddingsConfig>::default(),
            layer: Box::<TransformerLayerConfig>::default(),
            n_hidden_layers: 6,
            output_layer_norm: Box::new(Identity),
        }
    }
}

impl BuildArchitecture for TransformerDecoderConfig {
    type Architecture = TransformerDecoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let embeddings = self
            .embeddings
            .build(vb.push_prefix("embeddings"))
            .context(BuildTransformerEmbeddingsSnafu)?;

        let layers = (0..self.n_hidden_layers)
            .map(|n| {
                self.layer
                    .build_decoder_layer(vb.push_prefix(format!("layer_{n}")))
                    .context(BuildTransformerLayerSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformerDecoder {
            embeddings,
            layers,
            output_layer_norm: self
                .output_layer_norm
                .build(vb.push_prefix("output_layer_norm"))
                .context(BuildLayerNormSnafu)?,
        })
    }
}

/// Transformer decoder errors.
#[derive(Debug, Snafu)]
pub enum TransformerDecoderError {
    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot build embeddings"))]
    BuildTransformerEmbeddings { source: BoxedError },

    #[snafu(display("Cannot build transformer layer"))]
    BuildTransformerLayer { source: BoxedError },

    #[snafu(display("Cannot apply embeddings"))]
    Embedding { source: BoxedError },

    #[snafu(display("Cannot apply layer norm"))]
    LayerNorm { source: candle_core::Error },

    #[snafu(display("Cannot apply transformer layer"))]
    TransformerLayer { source: BoxedError },
}

/// Decoder using the transformer architecture.
///
/// The decoder attends causally over the target pieces and attends to
/// the last hidden layer of an encoder.
pub struct TransformerDecoder {
    embeddings: Box<dyn Embeddings>,
    layers: Vec<Box<dyn DecoderLayer>>,
    output_layer_norm: Box<dyn ModuleT>,
}

impl Decoder for TransformerDecoder {
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        attention_mask: &AttentionMask,
        encoder_hidden: &Tensor,
        encoder_mask: &AttentionMask,
        positions: Option<&Tensor>,
        train: bool,
    ) -> Result<DecoderOutput, BoxedError> {
        let embeddings = self
            .embeddings
            .forward(piece_ids, train, positions)
            .context(EmbeddingSnafu)?;

        let mut layer_output = embeddings;
        let mut layer_outputs = Vec::with_capacity(self.layers.len() + 1);
        layer_outputs.push(layer_output.clone());

        for layer in &self.layers {
            let next_layer_output = layer
                .forward_t(
                    &layer_output,
                    attention_mask,
                    encoder_hidden,
                    encoder_mask,
                    train,
                )
                .context(TransformerLayerSnafu)?;

            layer_outputs.push(next_layer_output.clone());
            layer_output = next_layer_output;
        }

        if let Some(last) = layer_outputs.last_mut() {
            *last = self
                .output_layer_norm
                .forward_t(last, train)
                .context(LayerNormSnafu)?;
        }

        Ok(DecoderOutput::new(layer_outputs))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, OptionExt, ResultExt, Whatever};

    use crate::architectures::{BuildDecoder, Decoder, LayerOutputs};
    use crate::layers::attention::MultiHeadAttentionConfig;
    use crate::layers::feedforward::PointwiseFeedForwardConfig;
    use crate::layers::layer_norm::LayerNormConfig;
    use crate::layers::transformer::{TransformerEmbeddingsConfig, TransformerLayerConfig};
    use crate::models::transformer::TransformerDecoderConfig;
    use crate::models::util::tests::sample_seq2seq_inputs;
    use crate::util::tests::PseudoRandom;

    #[test]
    #[report]
    fn decoder_attends_to_memory() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &device);
        let decoder = TransformerDecoderConfig::default()
            .embeddings(Box::new(
                TransformerEmbeddingsConfig::default()
                    .hidden_width(8)
                    .n_pieces(12),
            ))
            .layer(Box::new(
                TransformerLayerConfig::default()
                    .attention(MultiHeadAttentionConfig::default().hidden_width(8).n_heads(2))
                    .feedforward(
                        PointwiseFeedForwardConfig::default()
                            .hidden_width(8)
                            .intermediate_width(16),
                    ),
            ))
            .n_hidden_layers(2)
            .output_layer_norm(Box::new(LayerNormConfig::default().size(8)));
        let decoder = BuildDecoder::build(&decoder, vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build decoder".to_string()))?;

        let (_, source_mask, target, target_mask) = sample_seq2seq_inputs(&device)?;
        let memory = Tensor::pseudo_random(&[2, 5, 8], &device);
        let zeros = memory.zeros_like().whatever_context("Cannot create zeros")?;

        let decode = |memory: &Tensor| {
            decoder
                .forward_t(&target, &target_mask, memory, &source_mask, None, false)
                .map_err(|e| Whatever::with_source(e, "Cannot decode input".to_string()))
        };
        let output = decode(&memory)?;
        let zeros_output = decode(&zeros)?;

        assert_eq!(output.layer_outputs().len(), 3);
        let last = output.last_layer_output().whatever_context("No output")?;
        assert_eq!(last.dims(), &[2, 4, 8]);

        let difference = (last
            - zeros_output
                .last_layer_output()
                .whatever_context("No output")?)
        .and_then(|xs| xs.abs())
        .and_then(|xs| xs.sum_all())
        .and_then(|xs| xs.to_scalar::<f32>())
        .whatever_context("Cannot compare outputs")?;
        assert!(difference > 1e-4);

        Ok(())
    }
}
