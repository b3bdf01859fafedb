//! Training and evaluation data.
mod batch;
pub use batch::{Seq2SeqBatch, Seq2SeqBatchError};

mod dataset;
pub use dataset::{Seq2SeqDataset, Seq2SeqDatasetError, Seq2SeqExample};

mod special;
pub use special::{SpecialPieceIds, SpecialPieceIdsError};
