use candle_core::{Device, Tensor};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::layers::attention::{AttentionMask, AttentionMaskError};

/// `PiecesWithIds` errors.
#[derive(Debug, Snafu)]
pub enum PiecesWithIdsError {
    #[snafu(display("Cannot pad an empty batch"))]
    EmptyBatch,

    #[snafu(display("Cannot create padded tensor"))]
    PaddedTensor { source: candle_core::Error },

    #[snafu(display("Cannot create boolean mask"))]
    BoolMask { source: candle_core::Error },

    #[snafu(display("Cannot create attention mask"))]
    AttentionMask { source: AttentionMaskError },
}

/// Encoded output of tokenizers.
#[derive(Debug, Clone, Default)]
pub struct PiecesWithIds {
    /// Piece identifiers of each input sequence.
    pub ids: Vec<Vec<u32>>,
    /// Piece strings of each input sequence.
    pub pieces: Vec<Vec<String>>,
}

impl PiecesWithIds {
    /// Generate a padded tensor of the piece identifiers.
    ///
    /// See [`padded_tensor`].
    pub fn padded_tensor(
        &self,
        padding_id: u32,
        pad_left: bool,
        device: &Device,
    ) -> Result<Tensor, PiecesWithIdsError> {
        padded_tensor(&self.ids, padding_id, pad_left, device)
    }

    /// Generate the attention masks.
    ///
    /// See [`attention_mask`].
    pub fn attention_mask(
        &self,
        pad_left: bool,
        device: &Device,
    ) -> Result<AttentionMask, PiecesWithIdsError> {
        attention_mask(&self.ids, pad_left, device)
    }
}

fn padded_vec<S, F>(
    sequences: &[S],
    padding: u32,
    pad_left: bool,
    mut fill: F,
) -> Result<(Vec<u32>, usize), PiecesWithIdsError>
where
    S: AsRef<[u32]>,
    F: FnMut(&mut [u32], &[u32]),
{
    let max_len = sequences
        .iter()
        .map(|ids| ids.as_ref().len())
        .max()
        .context(EmptyBatchSnafu)?;

    let mut padded = vec![padding; sequences.len() * max_len];
    for (i, ids) in sequences.iter().enumerate() {
        let ids = ids.as_ref();
        let len = ids.len();
        let start = if pad_left { max_len - len } else { 0 };
        let end = if pad_left { max_len } else { len };
        fill(&mut padded[i * max_len + start..i * max_len + end], ids);
    }

    Ok((padded, max_len))
}

/// Generate a padded tensor of piece identifiers.
///
/// * sequences - Piece identifiers of each sequence.
/// * padding_id - Piece identifier of the padding piece. The actual identifier
///   generally doesn't matter when an attention mask is used (and
///   as long as it is a valid vocabulary index).
/// * pad_left - When `false`, sequences shorter than the longest sequence are
///   right-padded. Otherwise, sequences are left-padded.
/// * device - Device on which the padded tensor is created.
///
/// Returns: The padded piece ids.
/// *Shape:* ``(batch_size, max_seq_len)``
pub fn padded_tensor<S>(
    sequences: &[S],
    padding_id: u32,
    pad_left: bool,
    device: &Device,
) -> Result<Tensor, PiecesWithIdsError>
where
    S: AsRef<[u32]>,
{
    let (padded, max_len) = padded_vec(sequences, padding_id, pad_left, |dst, ids| {
        dst.copy_from_slice(ids)
    })?;
    Tensor::from_vec(padded, (sequences.len(), max_len), device).context(PaddedTensorSnafu)
}

/// Generate the attention mask of padded sequences. The mask is
/// equivalent to: `padded_tensor(sequences, padding_id) != padding_id`
///
/// * sequences - Piece identifiers of each sequence.
/// * pad_left - When `false`, sequences shorter than the longest sequence are
///   right-padded. Otherwise, sequences are left-padded.
/// * device - Device on which the mask is created.
///
/// Returns: The attention mask.
pub fn attention_mask<S>(
    sequences: &[S],
    pad_left: bool,
    device: &Device,
) -> Result<AttentionMask, PiecesWithIdsError>
where
    S: AsRef<[u32]>,
{
    let (padded, max_len) = padded_vec(sequences, 0, pad_left, |dst, _| dst.fill(1))?;
    let bool_mask =
        Tensor::from_vec(padded, (sequences.len(), max_len), device).context(BoolMaskSnafu)?;

    AttentionMask::new(bool_mask).context(AttentionMaskSnafu)
}
