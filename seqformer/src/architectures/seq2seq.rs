use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::architectures::{BuildArchitecture, DecoderOutput, EncoderOutput, LayerOutputs};
use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;

/// Sequence-to-sequence model output.
pub struct Seq2SeqOutput {
    encoder_output: EncoderOutput,
    decoder_output: DecoderOutput,
    logits: Tensor,
}

impl Seq2SeqOutput {
    /// Create a sequence-to-sequence model output.
    pub fn new(
        encoder_output: EncoderOutput,
        decoder_output: DecoderOutput,
        logits: Tensor,
    ) -> Self {
        Self {
            encoder_output,
            decoder_output,
            logits,
        }
    }

    /// Get the output of the encoder.
    pub fn encoder_output(&self) -> &EncoderOutput {
        &self.encoder_output
    }

    /// Get the output of the decoder.
    pub fn decoder_output(&self) -> &DecoderOutput {
        &self.decoder_output
    }

    /// Get the logits of the target pieces.
    ///
    /// The logit at position `i` scores the piece that follows the
    /// decoder input at position `i`.
    ///
    /// *Shape:* `(batch_size, target_len, n_pieces)`
    pub fn logits(&self) -> &Tensor {
        &self.logits
    }
}

impl LayerOutputs for Seq2SeqOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        self.decoder_output.layer_outputs()
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.decoder_output.embedding_layer_output()
    }
}

/// Trait for building sequence-to-sequence models.
pub trait BuildSeq2SeqModel: Debug {
    type Seq2SeqModel: Seq2SeqModel;

    /// Build a sequence-to-sequence model.
    fn build(&self, vb: VarBuilder) -> Result<Self::Seq2SeqModel, BoxedError>;
}

impl<C> BuildSeq2SeqModel for C
where
    C: BuildArchitecture + Debug,
    C::Architecture: Seq2SeqModel,
{
    type Seq2SeqModel = C::Architecture;

    fn build(&self, vb: VarBuilder) -> Result<Self::Seq2SeqModel, BoxedError> {
        self.build(vb)
    }
}

/// Trait for sequence-to-sequence (encoder-decoder) models.
pub trait Seq2SeqModel {
    /// Encode a source sequence.
    ///
    /// * `source_ids` - Source pieces.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `source_mask` - Attention mask of the source pieces.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `train` - Whether to train the model.
    fn encode(
        &self,
        source_ids: &Tensor,
        source_mask: &AttentionMask,
        train: bool,
    ) -> Result<EncoderOutput, BoxedError>;

    /// Decode a target sequence, attending to the encoded source.
    ///
    /// * `target_ids` - Decoder input pieces.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `target_mask` - Attention mask of the decoder input.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `encoder_output` - Output of [`Seq2SeqModel::encode`].
    /// * `source_mask` - Attention mask of the source pieces.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `train` - Whether to train the model.
    fn decode(
        &self,
        target_ids: &Tensor,
        target_mask: &AttentionMask,
        encoder_output: &EncoderOutput,
        source_mask: &AttentionMask,
        train: bool,
    ) -> Result<DecoderOutput, BoxedError>;

    /// Project the last decoder layer to piece logits.
    ///
    /// *Shape:* `(batch_size, target_len, n_pieces)`
    fn logits(&self, decoder_output: &DecoderOutput) -> Result<Tensor, BoxedError>;

    /// Encode the source and decode the target with teacher forcing.
    fn forward_t(
        &self,
        source_ids: &Tensor,
        source_mask: &AttentionMask,
        target_ids: &Tensor,
        target_mask: &AttentionMask,
        train: bool,
    ) -> Result<Seq2SeqOutput, BoxedError> {
        let encoder_output = self.encode(source_ids, source_mask, train)?;
        let decoder_output =
            self.decode(target_ids, target_mask, &encoder_output, source_mask, train)?;
        let logits = self.logits(&decoder_output)?;
        Ok(Seq2SeqOutput::new(encoder_output, decoder_output, logits))
    }
}
