//! Transformer sequence-to-sequence model.
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::architectures::{
    BuildArchitecture, BuildDecoder, BuildEncoder, Decoder, DecoderOutput, Encoder,
    EncoderOutput, LayerOutputs, Seq2SeqModel,
};
use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;
use crate::models::transformer::{
    TransformerDecoder, TransformerDecoderConfig, TransformerEncoder, TransformerEncoderConfig,
};

/// Transformer sequence-to-sequence model configuration.
#[derive(Debug, Default)]
pub struct TransformerSeq2SeqConfig {
    decoder: TransformerDecoderConfig,
    encoder: TransformerEncoderConfig,
    hidden_width: usize,
    n_pieces: usize,
}

impl TransformerSeq2SeqConfig {
    /// Decoder configuration.
    ///
    /// Default: `TransformerDecoderConfig::default()`
    pub fn decoder(mut self, decoder: TransformerDecoderConfig) -> Self {
        self.decoder = decoder;
        self
    }

    /// Encoder configuration.
    ///
    /// Default: `TransformerEncoderConfig::default()`
    pub fn encoder(mut self, encoder: TransformerEncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    /// Width of the decoder output.
    ///
    /// Default: `0`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Number of pieces in the output vocabulary.
    ///
    /// Default: `0`
    pub fn n_pieces(mut self, n_pieces: usize) -> Self {
        self.n_pieces = n_pieces;
        self
    }
}

impl BuildArchitecture for TransformerSeq2SeqConfig {
    type Architecture = TransformerSeq2Seq;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let encoder = BuildEncoder::build(&self.encoder, vb.push_prefix("encoder"))
            .context(BuildEncoderSnafu)?;
        let decoder = BuildDecoder::build(&self.decoder, vb.push_prefix("decoder"))
            .context(BuildDecoderSnafu)?;
        let output_embeddings = linear(
            self.hidden_width,
            self.n_pieces,
            vb.push_prefix("output_embeddings"),
        )
        .context(ConstructionSnafu)?;

        Ok(TransformerSeq2Seq {
            decoder,
            encoder,
            output_embeddings,
        })
    }
}

/// Transformer sequence-to-sequence model errors.
#[derive(Debug, Snafu)]
pub enum TransformerSeq2SeqError {
    #[snafu(display("Cannot build decoder"))]
    BuildDecoder { source: BoxedError },

    #[snafu(display("Cannot build encoder"))]
    BuildEncoder { source: BoxedError },

    #[snafu(display("Cannot construct output embeddings"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot decode target pieces"))]
    Decode { source: BoxedError },

    #[snafu(display("Cannot encode source pieces"))]
    Encode { source: BoxedError },

    #[snafu(display("Decoder did not return any hidden layers"))]
    NoDecoderOutput,

    #[snafu(display("Encoder did not return any hidden layers"))]
    NoEncoderOutput,

    #[snafu(display("Cannot compute logits"))]
    Logits { source: candle_core::Error },
}

/// Sequence-to-sequence model using the transformer architecture.
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
pub struct TransformerSeq2Seq {
    decoder: TransformerDecoder,
    encoder: TransformerEncoder,
    output_embeddings: Linear,
}

impl Seq2SeqModel for TransformerSeq2Seq {
    fn encode(
        &self,
        source_ids: &Tensor,
        source_mask: &AttentionMask,
        train: bool,
    ) -> Result<EncoderOutput, BoxedError> {
        Ok(self
            .encoder
            .forward_t(source_ids, source_mask, None, train)
            .context(EncodeSnafu)?)
    }

    fn decode(
        &self,
        target_ids: &Tensor,
        target_mask: &AttentionMask,
        encoder_output: &EncoderOutput,
        source_mask: &AttentionMask,
        train: bool,
    ) -> Result<DecoderOutput, BoxedError> {
        let encoder_hidden = encoder_output.memory().context(NoEncoderOutputSnafu)?;
        Ok(self
            .decoder
            .forward_t(
                target_ids,
                target_mask,
                encoder_hidden,
                source_mask,
                None,
                train,
            )
            .context(DecodeSnafu)?)
    }

    fn logits(&self, decoder_output: &DecoderOutput) -> Result<Tensor, BoxedError> {
        let last_hidden = decoder_output
            .last_layer_output()
            .context(NoDecoderOutputSnafu)?;
        Ok(self
            .output_embeddings
            .forward(last_hidden)
            .context(LogitsSnafu)?)
    }
}
