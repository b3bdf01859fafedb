//! Model and training configuration.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use crate::layers::activation::Activation;
use crate::layers::attention::{MultiHeadAttentionConfig, SDPAConfig};
use crate::layers::build_module::BuildModule;
use crate::layers::dropout::DropoutConfig;
use crate::layers::feedforward::PointwiseFeedForwardConfig;
use crate::layers::layer_norm::LayerNormConfig;
use crate::layers::transformer::{
    PositionEmbeddings, TransformerEmbeddingsConfig, TransformerLayerConfig,
};
use crate::models::transformer::{
    TransformerDecoderConfig, TransformerEncoderConfig, TransformerSeq2SeqConfig,
};

/// Configuration errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Cannot deserialize configuration: {}", path.to_string_lossy()))]
    Deserialize {
        source: serde_json::Error,
        path: PathBuf,
    },

    #[snafu(display("Invalid model configuration in {}", path.to_string_lossy()))]
    InvalidModel {
        source: ModelConfigError,
        path: PathBuf,
    },

    #[snafu(display("Invalid training configuration: {name} must be non-zero"))]
    InvalidTraining { name: &'static str },

    #[snafu(display("Cannot open configuration file: {}", path.to_string_lossy()))]
    Open {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Errors in the model configuration.
#[derive(Debug, Snafu)]
pub enum ModelConfigError {
    #[snafu(display(
        "Hidden width {hidden_width} must be divisible by the number of heads {n_heads}"
    ))]
    IndivisibleHeads { hidden_width: usize, n_heads: usize },

    #[snafu(display("{name} must be in [0, 1), was {p}"))]
    InvalidProbability { name: &'static str, p: f32 },

    #[snafu(display("{name} must be non-zero"))]
    Zero { name: &'static str },
}

/// Full configuration of a sequence-to-sequence transformer.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerConfig {
    /// Model hyperparameters.
    pub model: ModelConfig,

    /// Training hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,
}

impl TransformerConfig {
    /// Read a configuration from a JSON file.
    ///
    /// The model and training configurations are validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).context(OpenSnafu { path })?;
        let config: TransformerConfig =
            serde_json::from_reader(BufReader::new(file)).context(DeserializeSnafu { path })?;

        config
            .model
            .validate()
            .context(InvalidModelSnafu { path })?;
        config.training.validate()?;

        Ok(config)
    }
}

/// Read a configuration from a JSON file.
///
/// See [`TransformerConfig::from_file`].
pub fn load_config(path: impl AsRef<Path>) -> Result<TransformerConfig, ConfigError> {
    TransformerConfig::from_file(path)
}

/// Model hyperparameters.
///
/// Every field except `n_pieces` has a default. The defaults are those of
/// the base model of _Vaswani et al., 2017_.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Number of pieces in the vocabulary.
    pub n_pieces: usize,

    /// Width of the hidden representations.
    #[serde(default = "defaults::hidden_width")]
    pub hidden_width: usize,

    /// Width of the feed-forward layers.
    #[serde(default = "defaults::intermediate_width")]
    pub intermediate_width: usize,

    /// Number of attention heads.
    #[serde(default = "defaults::n_heads")]
    pub n_heads: usize,

    /// Number of encoder layers.
    #[serde(default = "defaults::n_layers")]
    pub n_encoder_layers: usize,

    /// Number of decoder layers.
    #[serde(default = "defaults::n_layers")]
    pub n_decoder_layers: usize,

    /// Maximum sequence length, including the special pieces.
    #[serde(default = "defaults::max_seq_len")]
    pub max_seq_len: usize,

    /// Dropout probability of embeddings and layer outputs.
    #[serde(default = "defaults::dropout")]
    pub dropout: f32,

    /// Dropout probability of attention weights.
    #[serde(default = "defaults::dropout")]
    pub attention_dropout: f32,

    /// Activation of the feed-forward layers.
    #[serde(default)]
    pub activation: Activation,

    /// Epsilon of layer normalization.
    #[serde(default = "defaults::layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Position embeddings.
    #[serde(default)]
    pub position_embeddings: PositionEmbeddings,

    /// Normalize sublayer inputs rather than residual outputs.
    #[serde(default)]
    pub pre_norm: bool,
}

mod defaults {
    pub fn hidden_width() -> usize {
        512
    }

    pub fn intermediate_width() -> usize {
        2048
    }

    pub fn n_heads() -> usize {
        8
    }

    pub fn n_layers() -> usize {
        6
    }

    pub fn max_seq_len() -> usize {
        512
    }

    pub fn dropout() -> f32 {
        0.1
    }

    pub fn layer_norm_eps() -> f64 {
        1e-5
    }
}

impl ModelConfig {
    /// Check that the configuration describes a valid model.
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        for (name, value) in [
            ("n_pieces", self.n_pieces),
            ("hidden_width", self.hidden_width),
            ("intermediate_width", self.intermediate_width),
            ("n_heads", self.n_heads),
            ("n_encoder_layers", self.n_encoder_layers),
            ("n_decoder_layers", self.n_decoder_layers),
            ("max_seq_len", self.max_seq_len),
        ] {
            ensure!(value > 0, ZeroSnafu { name });
        }

        ensure!(
            self.hidden_width % self.n_heads == 0,
            IndivisibleHeadsSnafu {
                hidden_width: self.hidden_width,
                n_heads: self.n_heads
            }
        );

        for (name, p) in [
            ("dropout", self.dropout),
            ("attention_dropout", self.attention_dropout),
        ] {
            ensure!((0.0..1.0).contains(&p), InvalidProbabilitySnafu { name, p });
        }

        Ok(())
    }

    fn dropout(&self) -> Box<dyn BuildModule> {
        Box::new(DropoutConfig::default().p(self.dropout))
    }

    fn layer_norm(&self) -> Box<dyn BuildModule> {
        Box::new(
            LayerNormConfig::default()
                .eps(self.layer_norm_eps)
                .size(self.hidden_width),
        )
    }

    fn embeddings(&self) -> TransformerEmbeddingsConfig {
        TransformerEmbeddingsConfig::default()
            .embedding_dropout(self.dropout())
            .hidden_width(self.hidden_width)
            .n_pieces(self.n_pieces)
            .n_positions(self.max_seq_len)
            .position_embeddings(self.position_embeddings)
    }

    fn layer(&self) -> TransformerLayerConfig {
        let attention = MultiHeadAttentionConfig::default()
            .attention_scorer(Box::new(SDPAConfig::default().dropout(Box::new(
                DropoutConfig::default().p(self.attention_dropout),
            ))))
            .dropout(self.dropout())
            .hidden_width(self.hidden_width)
            .n_heads(self.n_heads);

        let feedforward = PointwiseFeedForwardConfig::default()
            .activation(Box::new(self.activation))
            .dropout(self.dropout())
            .hidden_width(self.hidden_width)
            .intermediate_width(self.intermediate_width);

        let layer = TransformerLayerConfig::default()
            .attention(attention)
            .feedforward(feedforward);

        if self.pre_norm {
            layer
                .attn_input_layer_norm(self.layer_norm())
                .cross_attn_input_layer_norm(self.layer_norm())
                .ffn_input_layer_norm(self.layer_norm())
        } else {
            layer
                .attn_residual_layer_norm(self.layer_norm())
                .cross_attn_residual_layer_norm(self.layer_norm())
                .ffn_residual_layer_norm(self.layer_norm())
        }
    }
}

impl TryFrom<&ModelConfig> for TransformerSeq2SeqConfig {
    type Error = ModelConfigError;

    fn try_from(config: &ModelConfig) -> Result<Self, Self::Error> {
        config.validate()?;

        let mut encoder = TransformerEncoderConfig::default()
            .embeddings(Box::new(config.embeddings()))
            .layer(Box::new(config.layer()))
            .n_hidden_layers(config.n_encoder_layers);
        let mut decoder = TransformerDecoderConfig::default()
            .embeddings(Box::new(config.embeddings()))
            .layer(Box::new(config.layer()))
            .n_hidden_layers(config.n_decoder_layers);

        // Pre-norm layers leave the last residual stream unnormalized.
        if config.pre_norm {
            encoder = encoder.output_layer_norm(config.layer_norm());
            decoder = decoder.output_layer_norm(config.layer_norm());
        }

        Ok(TransformerSeq2SeqConfig::default()
            .encoder(encoder)
            .decoder(decoder)
            .hidden_width(config.hidden_width)
            .n_pieces(config.n_pieces))
    }
}

/// Training hyperparameters.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Peak learning rate.
    pub learning_rate: f64,

    /// Number of passes over the training data.
    pub epochs: usize,

    /// Number of examples per batch.
    pub batch_size: usize,

    /// AdamW first moment decay.
    pub beta1: f64,

    /// AdamW second moment decay.
    pub beta2: f64,

    /// AdamW epsilon.
    pub eps: f64,

    /// AdamW weight decay.
    pub weight_decay: f64,

    /// Number of linear warmup steps of the inverse square root schedule.
    /// The learning rate is constant when this is `0`.
    pub warmup_steps: usize,

    /// Seed of the shuffling of training examples.
    pub seed: u64,

    /// Maximum number of pieces to generate when predicting.
    pub max_predict_len: usize,
}

impl TrainingConfig {
    /// Check that the configuration can be used for training.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.epochs > 0, InvalidTrainingSnafu { name: "epochs" });
        ensure!(
            self.batch_size > 0,
            InvalidTrainingSnafu { name: "batch_size" }
        );
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            epochs: 10,
            batch_size: 32,
            beta1: 0.9,
            beta2: 0.98,
            eps: 1e-9,
            weight_decay: 0.0,
            warmup_steps: 0,
            seed: 42,
            max_predict_len: 128,
        }
    }
}
