use candle_core::{DType, Device, Tensor};
use snafu::{ResultExt, Snafu};

use crate::data::Seq2SeqExample;
use crate::layers::attention::AttentionMask;
use crate::tokenizers::pieces::{attention_mask, padded_tensor, PiecesWithIdsError};

/// Batch errors.
#[derive(Debug, Snafu)]
pub enum Seq2SeqBatchError {
    #[snafu(display("Cannot create label mask"))]
    LabelMask { source: candle_core::Error },

    #[snafu(display("Cannot pad sequences"))]
    Pad { source: PiecesWithIdsError },
}

/// Padded batch of sequence-to-sequence examples.
///
/// The decoder input is the target without its last piece and the labels
/// are the target without its first piece, so that the decoder predicts
/// the next target piece at every position.
pub struct Seq2SeqBatch {
    /// Source pieces.
    /// *Shape:* `(batch_size, source_len)`
    pub source_ids: Tensor,

    /// Source attention mask.
    /// *Shape:* `(batch_size, source_len)`
    pub source_mask: AttentionMask,

    /// Decoder input pieces.
    /// *Shape:* `(batch_size, target_len)`
    pub target_ids: Tensor,

    /// Decoder input attention mask.
    /// *Shape:* `(batch_size, target_len)`
    pub target_mask: AttentionMask,

    /// Pieces to predict.
    /// *Shape:* `(batch_size, target_len)`
    pub labels: Tensor,

    /// Float mask that is `1.0` for labels and `0.0` for padding.
    /// *Shape:* `(batch_size, target_len)`
    pub label_mask: Tensor,
}

impl Seq2SeqBatch {
    /// Pad a batch of examples.
    ///
    /// * `examples` - Examples in the batch.
    /// * `pad_id` - Identifier of the padding piece.
    /// * `device` - Device to allocate the batch on.
    pub fn new(
        examples: &[&Seq2SeqExample],
        pad_id: u32,
        device: &Device,
    ) -> Result<Self, Seq2SeqBatchError> {
        let sources = examples
            .iter()
            .map(|example| example.source_ids.as_slice())
            .collect::<Vec<_>>();
        let decoder_inputs = examples
            .iter()
            .map(|example| &example.target_ids[..example.target_ids.len().saturating_sub(1)])
            .collect::<Vec<_>>();
        let labels = examples
            .iter()
            .map(|example| example.target_ids.get(1..).unwrap_or_default())
            .collect::<Vec<_>>();

        let target_mask = attention_mask(&decoder_inputs, false, device).context(PadSnafu)?;
        let label_mask = target_mask
            .bool_mask()
            .to_dtype(DType::F32)
            .context(LabelMaskSnafu)?;

        Ok(Seq2SeqBatch {
            source_ids: padded_tensor(&sources, pad_id, false, device).context(PadSnafu)?,
            source_mask: attention_mask(&sources, false, device).context(PadSnafu)?,
            target_ids: padded_tensor(&decoder_inputs, pad_id, false, device)
                .context(PadSnafu)?,
            target_mask,
            labels: padded_tensor(&labels, pad_id, false, device).context(PadSnafu)?,
            label_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;
    use snafu::{report, ResultExt, Whatever};

    use super::Seq2SeqBatch;
    use crate::data::Seq2SeqExample;

    #[test]
    #[report]
    fn batch_shifts_targets() -> Result<(), Whatever> {
        let examples = [
            Seq2SeqExample {
                source_ids: vec![4, 5, 3],
                target_ids: vec![2, 6, 7, 8, 3],
            },
            Seq2SeqExample {
                source_ids: vec![9, 3],
                target_ids: vec![2, 6, 3],
            },
        ];
        let batch = Seq2SeqBatch::new(&[&examples[0], &examples[1]], 0, &Device::Cpu)
            .whatever_context("Cannot create batch")?;

        assert_eq!(
            batch
                .source_ids
                .to_vec2::<u32>()
                .whatever_context("Cannot convert source")?,
            vec![vec![4, 5, 3], vec![9, 3, 0]]
        );
        assert_eq!(
            batch
                .source_mask
                .bool_mask()
                .to_vec2::<u32>()
                .whatever_context("Cannot convert source mask")?,
            vec![vec![1, 1, 1], vec![1, 1, 0]]
        );
        assert_eq!(
            batch
                .target_ids
                .to_vec2::<u32>()
                .whatever_context("Cannot convert target")?,
            vec![vec![2, 6, 7, 8], vec![2, 6, 0, 0]]
        );
        assert_eq!(
            batch
                .labels
                .to_vec2::<u32>()
                .whatever_context("Cannot convert labels")?,
            vec![vec![6, 7, 8, 3], vec![6, 3, 0, 0]]
        );
        assert_eq!(
            batch
                .label_mask
                .to_vec2::<f32>()
                .whatever_context("Cannot convert label mask")?,
            vec![vec![1.0, 1.0, 1.0, 1.0], vec![1.0, 1.0, 0.0, 0.0]]
        );

        Ok(())
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(Seq2SeqBatch::new(&[], 0, &Device::Cpu).is_err());
    }
}
