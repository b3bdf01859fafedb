use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rand_core::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};

use crate::data::special::{SpecialPieceIds, SpecialPieceIdsError};
use crate::error::BoxedError;
use crate::tokenizers::tokenizer::{Tokenizer, TokenizerEncodeInput};

/// Dataset errors.
#[derive(Debug, Snafu)]
pub enum Seq2SeqDatasetError {
    #[snafu(display("Cannot parse line {line} of {}", path.to_string_lossy()))]
    Parse {
        line: usize,
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Cannot open dataset: {}", path.to_string_lossy()))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot read line {line} of {}", path.to_string_lossy()))]
    Read {
        line: usize,
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot resolve special pieces"))]
    SpecialPieces { source: SpecialPieceIdsError },

    #[snafu(display("Maximum sequence length must be at least 2, was {max_seq_len}"))]
    TooShort { max_seq_len: usize },

    #[snafu(display("Cannot tokenize text"))]
    Tokenize { source: BoxedError },
}

/// A source sequence and its target sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seq2SeqExample {
    /// Source pieces, ending with the end-of-sequence piece.
    pub source_ids: Vec<u32>,

    /// Target pieces, framed by the beginning-of-sequence and the
    /// end-of-sequence pieces.
    pub target_ids: Vec<u32>,
}

impl Seq2SeqExample {
    /// Frame source and target pieces with special pieces.
    ///
    /// Pieces are truncated such that the source and target are at most
    /// `max_seq_len` pieces long, including the special pieces.
    pub fn new(
        source: &[u32],
        target: &[u32],
        special_ids: SpecialPieceIds,
        max_seq_len: usize,
    ) -> Result<Self, Seq2SeqDatasetError> {
        ensure!(max_seq_len >= 2, TooShortSnafu { max_seq_len });

        let source_len = source.len().min(max_seq_len - 1);
        let mut source_ids = Vec::with_capacity(source_len + 1);
        source_ids.extend_from_slice(&source[..source_len]);
        source_ids.push(special_ids.eos);

        let target_len = target.len().min(max_seq_len - 2);
        let mut target_ids = Vec::with_capacity(target_len + 2);
        target_ids.push(special_ids.bos);
        target_ids.extend_from_slice(&target[..target_len]);
        target_ids.push(special_ids.eos);

        Ok(Seq2SeqExample {
            source_ids,
            target_ids,
        })
    }
}

#[derive(Deserialize)]
struct JsonExample {
    source: String,
    target: String,
}

/// Dataset of sequence-to-sequence examples.
#[derive(Clone, Debug, Default)]
pub struct Seq2SeqDataset {
    examples: Vec<Seq2SeqExample>,
}

impl Seq2SeqDataset {
    /// Create a dataset from examples.
    pub fn new(examples: Vec<Seq2SeqExample>) -> Self {
        Seq2SeqDataset { examples }
    }

    /// Tokenize source and target texts.
    ///
    /// * `pairs` - Source and target texts.
    /// * `tokenizer` - Tokenizer to split the texts with.
    /// * `max_seq_len` - Maximum length of a sequence, including special
    ///   pieces.
    pub fn from_texts<S, T>(
        pairs: &[(S, T)],
        tokenizer: &impl Tokenizer,
        max_seq_len: usize,
    ) -> Result<Self, Seq2SeqDatasetError>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let special_ids = SpecialPieceIds::from_tokenizer(tokenizer).context(SpecialPiecesSnafu)?;
        if pairs.is_empty() {
            return Ok(Self::default());
        }

        let sources = pairs
            .iter()
            .map(|(source, _)| TokenizerEncodeInput::RawString(source.as_ref()))
            .collect::<Vec<_>>();
        let targets = pairs
            .iter()
            .map(|(_, target)| TokenizerEncodeInput::RawString(target.as_ref()))
            .collect::<Vec<_>>();

        let sources = tokenizer.encode(sources).context(TokenizeSnafu)?;
        let targets = tokenizer.encode(targets).context(TokenizeSnafu)?;

        let examples = sources
            .ids
            .iter()
            .zip(&targets.ids)
            .map(|(source, target)| Seq2SeqExample::new(source, target, special_ids, max_seq_len))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Seq2SeqDataset { examples })
    }

    /// Read a dataset in JSON lines format.
    ///
    /// Every non-blank line is an object with the `source` and `target`
    /// texts.
    ///
    /// * `path` - Path of the dataset.
    /// * `tokenizer` - Tokenizer to split the texts with.
    /// * `max_seq_len` - Maximum length of a sequence, including special
    ///   pieces.
    pub fn from_jsonl(
        path: impl AsRef<Path>,
        tokenizer: &impl Tokenizer,
        max_seq_len: usize,
    ) -> Result<Self, Seq2SeqDatasetError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path).context(OpenSnafu { path })?);

        let mut pairs = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_number = idx + 1;
            let line = line.context(ReadSnafu {
                line: line_number,
                path,
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let example: JsonExample = serde_json::from_str(&line).context(ParseSnafu {
                line: line_number,
                path,
            })?;
            pairs.push((example.source, example.target));
        }

        if pairs.is_empty() {
            tracing::warn!("No examples in {}", path.to_string_lossy());
        } else {
            tracing::debug!(
                "Read {} examples from {}",
                pairs.len(),
                path.to_string_lossy()
            );
        }

        Self::from_texts(&pairs, tokenizer, max_seq_len)
    }

    /// Examples in the dataset.
    pub fn examples(&self) -> &[Seq2SeqExample] {
        &self.examples
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Split the dataset in batches.
    ///
    /// * `batch_size` - Maximum number of examples per batch, the last
    ///   batch can be smaller.
    /// * `shuffle_seed` - Shuffle examples with the given seed before
    ///   batching. The same seed always gives the same order.
    pub fn batches(
        &self,
        batch_size: usize,
        shuffle_seed: Option<u64>,
    ) -> Vec<Vec<&Seq2SeqExample>> {
        let mut examples = self.examples.iter().collect::<Vec<_>>();
        if let Some(seed) = shuffle_seed {
            shuffle(&mut examples, seed);
        }

        examples
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

/// Fisher-Yates shuffle.
fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = Pcg32::seed_from_u64(seed);
    for i in (1..items.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}
