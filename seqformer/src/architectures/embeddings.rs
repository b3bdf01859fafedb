use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Input embeddings of an encoder or decoder.
pub trait Embeddings {
    /// Embed pieces and their positions.
    ///
    /// * `piece_ids` - Pieces to embed.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `train` - Whether to apply dropout.
    /// * `positions` - Positions of the pieces, `0..seq_len` when absent.
    ///   *Shape:* `(batch_size, seq_len)`
    ///
    /// *Shape:* `(batch_size, seq_len, width)`
    fn forward(
        &self,
        piece_ids: &Tensor,
        train: bool,
        positions: Option<&Tensor>,
    ) -> Result<Tensor, BoxedError>;
}

pub trait BuildEmbeddings: Debug {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError>;
}
