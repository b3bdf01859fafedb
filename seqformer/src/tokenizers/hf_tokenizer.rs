use std::fs::File;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tokenizers::tokenizer::Tokenizer as HuggingFaceTokenizer;

use super::pieces::PiecesWithIds;
use super::tokenizer::{Tokenizer, TokenizerEncodeInput};
use crate::error::BoxedError;

/// `HfTokenizer` errors.
#[derive(Debug, Snafu)]
pub enum HfTokenizerError {
    #[snafu(display("Couldn't encode tokenizer inputs into pieces and ids"))]
    Encode { source: tokenizers::Error },

    #[snafu(display("Couldn't decode piece identifiers into strings"))]
    Decode { source: tokenizers::Error },

    #[snafu(display("Couldn't open JSON file at {}", path.to_string_lossy()))]
    OpenJSON {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot deserialize JSON file at {}", path.to_string_lossy()))]
    DeserializeJSON {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Couldn't load Hugging Face tokenizer from {}", path.to_string_lossy()))]
    LoadHFTokenizer { path: PathBuf, source: BoxedError },
}

/// Wraps the tokenizers from the HuggingFace `tokenizers` package. It supports a
/// wide range of piece tokenizers, including word piece, byte pair encoding, and
/// sentencepiece unigram tokenizers.
///
/// Use this tokenizer when a subword vocabulary in the `tokenizer.json`
/// format is available.
pub struct HfTokenizer {
    tokenizer: HuggingFaceTokenizer,
    special_pieces: config::SpecialTokens,
}

impl HfTokenizer {
    fn new(
        tokenizer: HuggingFaceTokenizer,
        config: Option<&config::ConfigWithSpecialTokens>,
        special_tokens_map: Option<&config::ConfigWithSpecialTokens>,
    ) -> Self {
        let lookup = |get: fn(&config::ConfigWithSpecialTokens) -> Option<&String>| {
            config
                .and_then(get)
                .or_else(|| special_tokens_map.and_then(get))
                .cloned()
        };

        Self {
            special_pieces: config::SpecialTokens {
                bos: lookup(config::ConfigWithSpecialTokens::bos_token),
                eos: lookup(config::ConfigWithSpecialTokens::eos_token),
                pad: lookup(config::ConfigWithSpecialTokens::pad_token),
            },
            tokenizer,
        }
    }

    /// Load a tokenizer from a local `tokenizer.json` file.
    ///
    /// The special pieces are read from the `tokenizer_config.json` and
    /// `special_tokens_map.json` files in the same directory, when
    /// present.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HfTokenizerError> {
        let path = path.as_ref();
        let tokenizer = HuggingFaceTokenizer::from_file(path)
            .context(LoadHFTokenizerSnafu { path })?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tokenizer_config = Self::try_parse_json_config(&dir.join("tokenizer_config.json"))?;
        let special_tokens_map =
            Self::try_parse_json_config(&dir.join("special_tokens_map.json"))?;

        Ok(Self::new(
            tokenizer,
            tokenizer_config.as_ref(),
            special_tokens_map.as_ref(),
        ))
    }

    fn try_parse_json_config(
        path: &Path,
    ) -> Result<Option<config::ConfigWithSpecialTokens>, HfTokenizerError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path).context(OpenJSONSnafu { path })?;
        serde_json::from_reader(file).context(DeserializeJSONSnafu { path })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode<V, I>(&self, input: V) -> Result<PiecesWithIds, BoxedError>
    where
        V: AsRef<[TokenizerEncodeInput<I>]>,
        I: AsRef<str>,
    {
        let converted_input = input
            .as_ref()
            .iter()
            .map(|input| match input {
                TokenizerEncodeInput::RawString(s) => {
                    tokenizers::EncodeInput::Single(s.as_ref().into())
                }
            })
            .collect::<Vec<_>>();

        let encoding = self
            .tokenizer
            .encode_batch(converted_input, false)
            .context(EncodeSnafu)?;

        Ok(PiecesWithIds {
            ids: encoding
                .iter()
                .map(|ids| ids.get_ids().to_owned())
                .collect(),
            pieces: encoding
                .iter()
                .map(|ids| ids.get_tokens().to_owned())
                .collect(),
        })
    }

    fn decode<V, I>(&self, input: V, skip_special_pieces: bool) -> Result<Vec<String>, BoxedError>
    where
        V: AsRef<[I]>,
        I: AsRef<[u32]>,
    {
        let converted_input = input
            .as_ref()
            .iter()
            .map(|input| input.as_ref())
            .collect::<Vec<_>>();

        self.tokenizer
            .decode_batch(&converted_input, skip_special_pieces)
            .context(DecodeSnafu)
            .boxed()
    }

    fn piece_to_id(&self, piece: impl AsRef<str>) -> Option<u32> {
        self.tokenizer.token_to_id(piece.as_ref())
    }

    fn bos_piece(&self) -> Option<&str> {
        self.special_pieces.bos.as_deref()
    }

    fn eos_piece(&self) -> Option<&str> {
        self.special_pieces.eos.as_deref()
    }

    fn pad_piece(&self) -> Option<&str> {
        self.special_pieces.pad.as_deref()
    }
}

mod config {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    /// Special token in the tokenizer configuration.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(untagged)]
    pub(super) enum SpecialTokenInConfig {
        Default(String),
        Wrapped { content: Option<String> },
    }

    impl SpecialTokenInConfig {
        fn content(&self) -> Option<&String> {
            match self {
                SpecialTokenInConfig::Default(s) => Some(s),
                SpecialTokenInConfig::Wrapped { content } => content.as_ref(),
            }
        }
    }

    /// Tokenizer configuration with special tokens. Used with
    /// `tokenizer_config.json` and `special_tokens_map.json` files.
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    pub(super) struct ConfigWithSpecialTokens {
        #[serde(default)]
        bos_token: Option<SpecialTokenInConfig>,
        #[serde(default)]
        eos_token: Option<SpecialTokenInConfig>,
        #[serde(default)]
        pad_token: Option<SpecialTokenInConfig>,
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    }

    impl ConfigWithSpecialTokens {
        pub(super) fn bos_token(&self) -> Option<&String> {
            self.bos_token.as_ref().and_then(SpecialTokenInConfig::content)
        }

        pub(super) fn eos_token(&self) -> Option<&String> {
            self.eos_token.as_ref().and_then(SpecialTokenInConfig::content)
        }

        pub(super) fn pad_token(&self) -> Option<&String> {
            self.pad_token.as_ref().and_then(SpecialTokenInConfig::content)
        }
    }

    #[derive(Debug, Default)]
    pub(super) struct SpecialTokens {
        pub bos: Option<String>,
        pub eos: Option<String>,
        pub pad: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::str::FromStr;

    use snafu::{report, FromString, ResultExt, Whatever};
    use tempfile::TempDir;
    use tokenizers::tokenizer::Tokenizer as HuggingFaceTokenizer;

    use super::HfTokenizer;
    use crate::tokenizers::tokenizer::{Tokenizer, TokenizerEncodeInput};

    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<pad>": 0, "<unk>": 1, "<s>": 2, "</s>": 3, "hello": 4, "world": 5},
            "unk_token": "<unk>"
        }
    }"#;

    #[test]
    #[report]
    fn hf_tokenizer_encodes_without_special_pieces() -> Result<(), Whatever> {
        let tokenizer = HfTokenizer::new(
            HuggingFaceTokenizer::from_str(TOKENIZER_JSON)
                .map_err(|e| Whatever::with_source(e, "Cannot parse tokenizer".to_string()))?,
            None,
            None,
        );

        let input: Vec<TokenizerEncodeInput<String>> = vec!["hello world".into(), "hi".into()];
        let encoded = tokenizer
            .encode(input)
            .map_err(|e| Whatever::with_source(e, "Cannot encode".to_string()))?;
        assert_eq!(encoded.ids, vec![vec![4, 5], vec![1]]);
        assert_eq!(tokenizer.piece_to_id("world"), Some(5));
        assert_eq!(tokenizer.eos_piece(), None);

        Ok(())
    }

    #[test]
    #[report]
    fn hf_tokenizer_reads_special_pieces_from_config() -> Result<(), Whatever> {
        let dir = TempDir::new().whatever_context("Cannot create temporary directory")?;
        fs::write(dir.path().join("tokenizer.json"), TOKENIZER_JSON)
            .whatever_context("Cannot write tokenizer")?;
        fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"eos_token": {"content": "</s>"}, "bos_token": "<s>", "model_max_length": 512}"#,
        )
        .whatever_context("Cannot write tokenizer config")?;
        fs::write(
            dir.path().join("special_tokens_map.json"),
            r#"{"pad_token": "<pad>", "eos_token": "<unk>"}"#,
        )
        .whatever_context("Cannot write special tokens map")?;

        let tokenizer = HfTokenizer::from_file(dir.path().join("tokenizer.json"))
            .whatever_context("Cannot load tokenizer")?;
        assert_eq!(tokenizer.bos_piece(), Some("<s>"));
        assert_eq!(tokenizer.eos_piece(), Some("</s>"));
        assert_eq!(tokenizer.pad_piece(), Some("<pad>"));

        Ok(())
    }
}
