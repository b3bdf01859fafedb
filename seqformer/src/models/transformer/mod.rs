mod decoder;
pub use decoder::{TransformerDecoder, TransformerDecoderConfig, TransformerDecoderError};

mod encoder;
pub use encoder::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderError};

mod seq2seq;
pub use seq2seq::{TransformerSeq2Seq, TransformerSeq2SeqConfig, TransformerSeq2SeqError};
