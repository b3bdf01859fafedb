use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::architectures::output::LayerOutputs;
use crate::architectures::BuildArchitecture;
use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;

/// Hidden representations of a target prefix.
///
/// Holds the embedding output followed by the output of every decoder
/// layer.
pub struct DecoderOutput {
    all_outputs: Vec<Tensor>,
}

impl DecoderOutput {
    pub fn new(all_outputs: Vec<Tensor>) -> Self {
        Self { all_outputs }
    }
}

impl LayerOutputs for DecoderOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        &self.all_outputs
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.all_outputs.first()
    }
}

/// Trait for decoders.
///
/// A decoder attends causally over the target prefix and attends to the
/// memory of an encoder.
pub trait Decoder {
    /// Decode a target prefix.
    ///
    /// * `piece_ids` - Target pieces.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `attention_mask` - Target padding mask.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `encoder_hidden` - Encoder memory.
    ///   *Shape:* `(batch_size, source_len, width)`
    /// * `encoder_mask` - Source padding mask.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `positions` - Positions of the pieces, `0..target_len` when absent.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `train` - Whether to apply dropout.
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        attention_mask: &AttentionMask,
        encoder_hidden: &Tensor,
        encoder_mask: &AttentionMask,
        positions: Option<&Tensor>,
        train: bool,
    ) -> Result<DecoderOutput, BoxedError>;
}

/// Trait for building decoders.
pub trait BuildDecoder: Debug {
    type Decoder: Decoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Decoder, BoxedError>;
}

impl<C> BuildDecoder for C
where
    C: BuildArchitecture + Debug,
    C::Architecture: Decoder,
{
    type Decoder = C::Architecture;

    fn build(&self, vb: VarBuilder) -> Result<Self::Decoder, BoxedError> {
        self.build(vb)
    }
}

/// A single layer of a decoder stack.
pub trait DecoderLayer {
    /// Apply causal self-attention, attention over the encoder memory and
    /// the feed-forward sublayer.
    ///
    /// * `input` - Output of the previous layer.
    ///   *Shape:* `(batch_size, target_len, width)`
    /// * `attention_mask` - Target padding mask.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `encoder_hidden` - Encoder memory.
    ///   *Shape:* `(batch_size, source_len, width)`
    /// * `encoder_mask` - Source padding mask.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `train` - Whether to apply dropout.
    ///
    /// *Shape:* `(batch_size, target_len, width)`
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        encoder_hidden: &Tensor,
        encoder_mask: &AttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError>;
}

/// Trait for building decoder layers.
pub trait BuildDecoderLayer: Debug {
    fn build_decoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn DecoderLayer>, BoxedError>;
}
