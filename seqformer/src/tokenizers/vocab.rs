//! Word-level tokenizer with a JSON vocabulary.
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use regex::Regex;
use snafu::{OptionExt, ResultExt, Snafu};

use super::pieces::PiecesWithIds;
use super::tokenizer::{Tokenizer, TokenizerEncodeInput};
use crate::error::BoxedError;

/// `VocabTokenizer` errors.
#[derive(Debug, Snafu)]
pub enum VocabTokenizerError {
    #[snafu(display("Cannot deserialize vocabulary at {}", path.to_string_lossy()))]
    DeserializeVocab {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Pieces '{piece}' and '{other}' have the same identifier {id}"))]
    DuplicateId {
        id: u32,
        piece: String,
        other: String,
    },

    #[snafu(display("Vocabulary does not contain the special piece '{piece}'"))]
    MissingSpecialPiece { piece: String },

    #[snafu(display("Couldn't open vocabulary at {}", path.to_string_lossy()))]
    OpenVocab {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot compile piece splitting pattern"))]
    SplitPattern { source: regex::Error },
}

/// Special pieces of a vocabulary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecialPieces {
    /// Beginning of sequence.
    pub bos: String,

    /// End of sequence.
    pub eos: String,

    /// Padding.
    pub pad: String,

    /// Unknown piece.
    pub unk: String,
}

impl Default for SpecialPieces {
    fn default() -> Self {
        Self {
            bos: "<s>".to_string(),
            eos: "</s>".to_string(),
            pad: "<pad>".to_string(),
            unk: "<unk>".to_string(),
        }
    }
}

/// Tokenizer that splits text in words and punctuation and looks the
/// resulting pieces up in a vocabulary.
///
/// The vocabulary is a JSON object that maps pieces to their identifiers.
/// Pieces that are not in the vocabulary are mapped to the unknown piece.
/// The unknown piece is kept when decoding skips special pieces.
pub struct VocabTokenizer {
    id_to_piece: HashMap<u32, String>,
    lowercase: bool,
    piece_to_id: HashMap<String, u32>,
    special_ids: HashSet<u32>,
    special_pieces: SpecialPieces,
    splitter: Regex,
    unk_id: u32,
}

impl VocabTokenizer {
    /// Construct a tokenizer from a vocabulary.
    ///
    /// * vocab - Mapping from pieces to identifiers.
    /// * special_pieces - Special pieces, which must be in the vocabulary.
    /// * lowercase - Lowercase text before splitting it into pieces.
    pub fn new(
        vocab: HashMap<String, u32>,
        special_pieces: SpecialPieces,
        lowercase: bool,
    ) -> Result<Self, VocabTokenizerError> {
        let mut id_to_piece: HashMap<u32, String> = HashMap::with_capacity(vocab.len());
        for (piece, &id) in &vocab {
            if let Some(other) = id_to_piece.insert(id, piece.clone()) {
                // Report the pieces in a stable order.
                let (piece, other) = if piece < &other {
                    (piece.clone(), other)
                } else {
                    (other, piece.clone())
                };
                return DuplicateIdSnafu { id, piece, other }.fail();
            }
        }

        let special_id = |piece: &String| {
            vocab
                .get(piece)
                .copied()
                .context(MissingSpecialPieceSnafu { piece })
        };
        let unk_id = special_id(&special_pieces.unk)?;
        let special_ids = [
            special_id(&special_pieces.bos)?,
            special_id(&special_pieces.eos)?,
            special_id(&special_pieces.pad)?,
        ]
        .into_iter()
        .collect::<HashSet<_>>();

        Ok(VocabTokenizer {
            id_to_piece,
            lowercase,
            piece_to_id: vocab,
            special_ids,
            special_pieces,
            splitter: Regex::new(r"\w+|[^\w\s]").context(SplitPatternSnafu)?,
            unk_id,
        })
    }

    /// Load a tokenizer from a JSON vocabulary file.
    ///
    /// The default special pieces are used and text is not lowercased.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VocabTokenizerError> {
        Self::from_file_with(path, SpecialPieces::default(), false)
    }

    /// Load a tokenizer from a JSON vocabulary file.
    ///
    /// * path - Path of the vocabulary.
    /// * special_pieces - Special pieces, which must be in the vocabulary.
    /// * lowercase - Lowercase text before splitting it into pieces.
    pub fn from_file_with(
        path: impl AsRef<Path>,
        special_pieces: SpecialPieces,
        lowercase: bool,
    ) -> Result<Self, VocabTokenizerError> {
        let path = path.as_ref();
        let file = File::open(path).context(OpenVocabSnafu { path })?;
        let vocab: HashMap<String, u32> =
            serde_json::from_reader(BufReader::new(file)).context(DeserializeVocabSnafu { path })?;
        Self::new(vocab, special_pieces, lowercase)
    }

    /// Number of pieces in the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.piece_to_id.len()
    }

    /// Special pieces of the vocabulary.
    pub fn special_pieces(&self) -> &SpecialPieces {
        &self.special_pieces
    }
}

impl Tokenizer for VocabTokenizer {
    fn encode<V, I>(&self, input: V) -> Result<PiecesWithIds, BoxedError>
    where
        V: AsRef<[TokenizerEncodeInput<I>]>,
        I: AsRef<str>,
    {
        let mut ids = Vec::with_capacity(input.as_ref().len());
        let mut pieces = Vec::with_capacity(input.as_ref().len());

        for input in input.as_ref() {
            let TokenizerEncodeInput::RawString(text) = input;
            let text = if self.lowercase {
                text.as_ref().to_lowercase()
            } else {
                text.as_ref().to_owned()
            };

            let (sequence_ids, sequence_pieces): (Vec<_>, Vec<_>) = self
                .splitter
                .find_iter(&text)
                .map(|piece| {
                    let piece = piece.as_str();
                    let id = self.piece_to_id.get(piece).copied().unwrap_or(self.unk_id);
                    (id, piece.to_owned())
                })
                .unzip();

            ids.push(sequence_ids);
            pieces.push(sequence_pieces);
        }

        Ok(PiecesWithIds { ids, pieces })
    }

    fn decode<V, I>(&self, input: V, skip_special_pieces: bool) -> Result<Vec<String>, BoxedError>
    where
        V: AsRef<[I]>,
        I: AsRef<[u32]>,
    {
        Ok(input
            .as_ref()
            .iter()
            .map(|ids| {
                ids.as_ref()
                    .iter()
                    .filter(|&id| !(skip_special_pieces && self.special_ids.contains(id)))
                    .map(|id| {
                        self.id_to_piece
                            .get(id)
                            .map(String::as_str)
                            .unwrap_or(self.special_pieces.unk.as_str())
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect())
    }

    fn piece_to_id(&self, piece: impl AsRef<str>) -> Option<u32> {
        self.piece_to_id.get(piece.as_ref()).copied()
    }

    fn bos_piece(&self) -> Option<&str> {
        Some(&self.special_pieces.bos)
    }

    fn eos_piece(&self) -> Option<&str> {
        Some(&self.special_pieces.eos)
    }

    fn pad_piece(&self) -> Option<&str> {
        Some(&self.special_pieces.pad)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use rstest::{fixture, rstest};
    use snafu::{FromString, Report, ResultExt, Whatever};
    use tempfile::NamedTempFile;

    use super::{SpecialPieces, VocabTokenizer, VocabTokenizerError};
    use crate::tokenizers::tokenizer::{Tokenizer, TokenizerEncodeInput};

    #[fixture]
    fn vocab() -> HashMap<String, u32> {
        [
            ("<pad>", 0),
            ("<unk>", 1),
            ("<s>", 2),
            ("</s>", 3),
            ("hello", 4),
            ("world", 5),
            (",", 6),
            ("!", 7),
        ]
        .into_iter()
        .map(|(piece, id)| (piece.to_string(), id))
        .collect()
    }

    #[rstest]
    fn vocab_tokenizer_splits_words_and_punctuation(
        vocab: HashMap<String, u32>,
    ) -> Report<Whatever> {
        Report::capture(|| {
            let tokenizer = VocabTokenizer::new(vocab, SpecialPieces::default(), true)
                .whatever_context("Cannot create tokenizer")?;

            let input: Vec<TokenizerEncodeInput<String>> =
                vec!["Hello, world!".into(), "hello there".into()];
            let encoded = tokenizer
                .encode(input)
                .map_err(|e| Whatever::with_source(e, "Cannot encode".to_string()))?;

            assert_eq!(encoded.ids, vec![vec![4, 6, 5, 7], vec![4, 1]]);
            assert_eq!(encoded.pieces[1], vec!["hello", "there"]);

            Ok(())
        })
    }

    #[rstest]
    fn vocab_tokenizer_decodes(vocab: HashMap<String, u32>) -> Report<Whatever> {
        Report::capture(|| {
            let tokenizer = VocabTokenizer::new(vocab, SpecialPieces::default(), false)
                .whatever_context("Cannot create tokenizer")?;

            let ids = [vec![2u32, 4, 6, 5, 3, 0], vec![4, 99], vec![1, 4]];
            let decoded = tokenizer
                .decode(&ids, true)
                .map_err(|e| Whatever::with_source(e, "Cannot decode".to_string()))?;
            assert_eq!(decoded, vec!["hello , world", "hello <unk>", "<unk> hello"]);

            let decoded = tokenizer
                .decode(&ids[..1], false)
                .map_err(|e| Whatever::with_source(e, "Cannot decode".to_string()))?;
            assert_eq!(decoded, vec!["<s> hello , world </s> <pad>"]);

            Ok(())
        })
    }

    #[rstest]
    fn vocab_tokenizer_requires_special_pieces(mut vocab: HashMap<String, u32>) {
        vocab.remove("</s>");
        assert!(matches!(
            VocabTokenizer::new(vocab, SpecialPieces::default(), false),
            Err(VocabTokenizerError::MissingSpecialPiece { piece }) if piece == "</s>"
        ));
    }

    #[rstest]
    fn vocab_tokenizer_rejects_duplicate_ids(mut vocab: HashMap<String, u32>) {
        vocab.insert("again".to_string(), 4);
        assert!(matches!(
            VocabTokenizer::new(vocab, SpecialPieces::default(), false),
            Err(VocabTokenizerError::DuplicateId { id: 4, .. })
        ));
    }

    #[rstest]
    fn vocab_tokenizer_loads_from_file(vocab: HashMap<String, u32>) -> Report<Whatever> {
        Report::capture(|| {
            let mut file = NamedTempFile::new().whatever_context("Cannot create temporary file")?;
            serde_json::to_writer(&mut file, &vocab).whatever_context("Cannot write vocabulary")?;
            file.flush().whatever_context("Cannot flush vocabulary")?;

            let tokenizer =
                VocabTokenizer::from_file(file.path()).whatever_context("Cannot load vocabulary")?;
            assert_eq!(tokenizer.vocab_size(), 8);
            assert_eq!(tokenizer.piece_to_id("world"), Some(5));
            assert_eq!(tokenizer.eos_piece(), Some("</s>"));
            assert_eq!(tokenizer.pad_piece(), Some("<pad>"));

            Ok(())
        })
    }
}
