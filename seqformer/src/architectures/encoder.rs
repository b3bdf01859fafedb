use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::architectures::output::LayerOutputs;
use crate::architectures::BuildArchitecture;
use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;

/// Hidden representations of a source sequence.
///
/// Holds the embedding output followed by the output of every encoder
/// layer.
pub struct EncoderOutput {
    all_outputs: Vec<Tensor>,
}

impl EncoderOutput {
    pub fn new(all_outputs: Vec<Tensor>) -> Self {
        Self { all_outputs }
    }

    /// Memory that the decoder attends to, the output of the last layer.
    ///
    /// *Shape:* `(batch_size, source_len, width)`
    pub fn memory(&self) -> Option<&Tensor> {
        self.last_layer_output()
    }
}

impl LayerOutputs for EncoderOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        &self.all_outputs
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.all_outputs.first()
    }
}

/// Trait for encoders.
///
/// An encoder attends bidirectionally over the source sequence.
pub trait Encoder {
    /// Encode a source sequence.
    ///
    /// * `piece_ids` - Source pieces.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `attention_mask` - Source padding mask, pieces with mask `0` are
    ///   not attended to.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `positions` - Positions of the pieces, `0..source_len` when absent.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `train` - Whether to apply dropout.
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        attention_mask: &AttentionMask,
        positions: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderOutput, BoxedError>;
}

/// Trait for building encoders.
pub trait BuildEncoder: Debug {
    type Encoder: Encoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Encoder, BoxedError>;
}

impl<C> BuildEncoder for C
where
    C: BuildArchitecture + Debug,
    C::Architecture: Encoder,
{
    type Encoder = C::Architecture;

    fn build(&self, vb: VarBuilder) -> Result<Self::Encoder, BoxedError> {
        self.build(vb)
    }
}

/// A single layer of an encoder stack.
pub trait EncoderLayer {
    /// Apply self-attention and the feed-forward sublayer.
    ///
    /// * `input` - Output of the previous layer.
    ///   *Shape:* `(batch_size, source_len, width)`
    /// * `attention_mask` - Source padding mask.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `train` - Whether to apply dropout.
    ///
    /// *Shape:* `(batch_size, source_len, width)`
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError>;
}

/// Trait for building encoder layers.
pub trait BuildEncoderLayer: Debug {
    fn build_encoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn EncoderLayer>, BoxedError>;
}
