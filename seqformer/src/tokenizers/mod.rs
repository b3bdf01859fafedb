/// Tokenizers.
pub mod hf_tokenizer;

pub mod pieces;

pub mod tokenizer;

pub mod vocab;
