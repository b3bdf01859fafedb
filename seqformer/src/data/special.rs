use snafu::{OptionExt, Snafu};

use crate::tokenizers::tokenizer::Tokenizer;

/// Errors when resolving special pieces.
#[derive(Debug, Snafu)]
pub enum SpecialPieceIdsError {
    #[snafu(display("Tokenizer does not define a {kind} piece"))]
    Undefined { kind: &'static str },

    #[snafu(display("Special piece '{piece}' is not in the vocabulary"))]
    UnknownPiece { piece: String },
}

/// Identifiers of the special pieces used to frame sequences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialPieceIds {
    /// Beginning of sequence, first decoder input.
    pub bos: u32,

    /// End of sequence.
    pub eos: u32,

    /// Padding.
    pub pad: u32,
}

impl SpecialPieceIds {
    /// Look up the special pieces of a tokenizer.
    pub fn from_tokenizer(tokenizer: &impl Tokenizer) -> Result<Self, SpecialPieceIdsError> {
        let lookup =
            |piece: Option<&str>, kind: &'static str| -> Result<u32, SpecialPieceIdsError> {
                let piece = piece.context(UndefinedSnafu { kind })?;
                tokenizer
                    .piece_to_id(piece)
                    .context(UnknownPieceSnafu { piece })
            };

        Ok(SpecialPieceIds {
            bos: lookup(tokenizer.bos_piece(), "beginning-of-sequence")?,
            eos: lookup(tokenizer.eos_piece(), "end-of-sequence")?,
            pad: lookup(tokenizer.pad_piece(), "padding")?,
        })
    }
}
