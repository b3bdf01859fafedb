use candle_core::{DType, Device, IndexOp, Tensor, D};
use snafu::{ensure, ResultExt, Snafu};

use crate::architectures::Seq2SeqModel;
use crate::error::BoxedError;
use crate::layers::attention::{AttentionMask, AttentionMaskError};

/// Greedy generation errors.
#[derive(Debug, Snafu)]
pub enum GreedyGeneratorError {
    #[snafu(display("Cannot create attention mask"))]
    AttentionMask { source: AttentionMaskError },

    #[snafu(display("Cannot decode target prefix"))]
    Decode { source: BoxedError },

    #[snafu(display("Cannot generate from an empty source sequence"))]
    EmptySource,

    #[snafu(display("Cannot encode source sequence"))]
    Encode { source: BoxedError },

    #[snafu(display("Cannot select next piece"))]
    NextPiece { source: candle_core::Error },

    #[snafu(display("Cannot compute logits"))]
    Logits { source: BoxedError },

    #[snafu(display("Cannot create input tensor"))]
    Input { source: candle_core::Error },
}

/// Greedy generator for sequence-to-sequence models.
///
/// The source is encoded once. Then the decoder is applied to the target
/// prefix and the most probable piece is appended, until the
/// end-of-sequence piece is predicted or `max_len` pieces are generated.
#[derive(Clone, Debug)]
pub struct GreedyGenerator {
    bos_id: u32,
    eos_id: u32,
    max_len: usize,
}

impl GreedyGenerator {
    /// Construct a generator.
    ///
    /// * `bos_id` - Beginning-of-sequence piece, the first decoder input.
    /// * `eos_id` - End-of-sequence piece, stops generation.
    /// * `max_len` - Maximum number of pieces to generate.
    pub fn new(bos_id: u32, eos_id: u32, max_len: usize) -> Self {
        GreedyGenerator {
            bos_id,
            eos_id,
            max_len,
        }
    }

    fn ones_mask(len: usize, device: &Device) -> Result<AttentionMask, GreedyGeneratorError> {
        let mask = Tensor::ones((1, len), DType::U32, device).context(InputSnafu)?;
        AttentionMask::new(mask).context(AttentionMaskSnafu)
    }

    /// Generate a target sequence.
    ///
    /// * `model` - Model to generate with.
    /// * `source_ids` - Source pieces, including the end-of-sequence piece.
    /// * `device` - Device that the model is on.
    ///
    /// Returns: the generated pieces, without the beginning-of-sequence and
    /// end-of-sequence pieces.
    pub fn generate(
        &self,
        model: &impl Seq2SeqModel,
        source_ids: &[u32],
        device: &Device,
    ) -> Result<Vec<u32>, GreedyGeneratorError> {
        ensure!(!source_ids.is_empty(), EmptySourceSnafu);

        let source = Tensor::new(source_ids, device)
            .and_then(|xs| xs.unsqueeze(0))
            .context(InputSnafu)?;
        let source_mask = Self::ones_mask(source_ids.len(), device)?;
        let encoder_output = model
            .encode(&source, &source_mask, false)
            .context(EncodeSnafu)?;

        let mut ids = vec![self.bos_id];
        while ids.len() <= self.max_len {
            let target = Tensor::new(ids.as_slice(), device)
                .and_then(|xs| xs.unsqueeze(0))
                .context(InputSnafu)?;
            let target_mask = Self::ones_mask(ids.len(), device)?;

            let decoder_output = model
                .decode(&target, &target_mask, &encoder_output, &source_mask, false)
                .context(DecodeSnafu)?;
            let logits = model.logits(&decoder_output).context(LogitsSnafu)?;

            let next = logits
                .i((0, ids.len() - 1))
                .and_then(|last| last.argmax(D::Minus1))
                .and_then(|next| next.to_scalar::<u32>())
                .context(NextPieceSnafu)?;
            if next == self.eos_id {
                break;
            }
            ids.push(next);
        }

        ids.remove(0);
        Ok(ids)
    }
}
