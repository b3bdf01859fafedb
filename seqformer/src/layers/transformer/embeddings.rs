use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{Embedding, Init, VarBuilder};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildEmbeddings, Embeddings};
use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;
use crate::layers::embeddings::{SinusoidalPositions, SinusoidalPositionsError};
use crate::layers::identity::Identity;

/// Position embeddings added to the piece embeddings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionEmbeddings {
    /// Fixed sinusoidal embeddings.
    #[default]
    Sinusoidal,

    /// Trained position embeddings.
    Learned,

    /// No position embeddings.
    None,
}

/// Transformer embeddings configuration.
#[derive(Debug)]
pub struct TransformerEmbeddingsConfig {
    embedding_dropout: Box<dyn BuildModule>,
    embedding_layer_norm: Box<dyn BuildModule>,
    hidden_width: usize,
    n_pieces: usize,
    n_positions: usize,
    position_embeddings: PositionEmbeddings,
    scale_embeddings: bool,
}

impl TransformerEmbeddingsConfig {
    /// Dropout to apply after embedding layer normalization.
    ///
    /// Default: `Identity`
    pub fn embedding_dropout(mut self, embedding_dropout: Box<dyn BuildModule>) -> Self {
        self.embedding_dropout = embedding_dropout;
        self
    }

    /// Normalization to apply after the position embeddings are added.
    ///
    /// Default: `Identity`
    pub fn embedding_layer_norm(mut self, embedding_layer_norm: Box<dyn BuildModule>) -> Self {
        self.embedding_layer_norm = embedding_layer_norm;
        self
    }

    /// Width of the embeddings.
    ///
    /// Default: `512`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Number of pieces in the vocabulary.
    ///
    /// Default: `30000`
    pub fn n_pieces(mut self, n_pieces: usize) -> Self {
        self.n_pieces = n_pieces;
        self
    }

    /// Maximum number of positions.
    ///
    /// Default: `512`
    pub fn n_positions(mut self, n_positions: usize) -> Self {
        self.n_positions = n_positions;
        self
    }

    /// Type of position embeddings.
    ///
    /// Default: `PositionEmbeddings::Sinusoidal`
    pub fn position_embeddings(mut self, position_embeddings: PositionEmbeddings) -> Self {
        self.position_embeddings = position_embeddings;
        self
    }

    /// Scale piece embeddings by `sqrt(hidden_width)`.
    ///
    /// Default: `true`
    pub fn scale_embeddings(mut self, scale_embeddings: bool) -> Self {
        self.scale_embeddings = scale_embeddings;
        self
    }
}

impl Default for TransformerEmbeddingsConfig {
    fn default() -> Self {
        Self {
            embedding_dropout: Box::new(Identity),
            embedding_layer_norm: Box::new(Identity),
            hidden_width: 512,
            n_pieces: 30000,
            n_positions: 512,
            position_embeddings: PositionEmbeddings::default(),
            scale_embeddings: true,
        }
    }
}

impl BuildEmbeddings for TransformerEmbeddingsConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError> {
        let init = Init::Randn {
            mean: 0.,
            stdev: (self.hidden_width as f64).powf(-0.5),
        };
        let embedding = |n: usize, name: &str| {
            vb.push_prefix(name)
                .get_with_hints((n, self.hidden_width), "weight", init)
                .map(|weight| Embedding::new(weight, self.hidden_width))
                .context(ConstructionSnafu)
        };

        let piece_embeddings = embedding(self.n_pieces, "piece_embeddings")?;

        let positions = match self.position_embeddings {
            PositionEmbeddings::Sinusoidal => PositionLookup::Sinusoidal(
                SinusoidalPositions::new(
                    self.hidden_width,
                    self.n_positions,
                    vb.dtype(),
                    vb.device(),
                )
                .context(SinusoidalSnafu)?,
            ),
            PositionEmbeddings::Learned => {
                PositionLookup::Learned(embedding(self.n_positions, "position_embeddings")?)
            }
            PositionEmbeddings::None => PositionLookup::None,
        };

        Ok(Box::new(TransformerEmbeddings {
            embedding_dropout: self
                .embedding_dropout
                .build(vb.push_prefix("embedding_dropout"))
                .context(BuildDropoutSnafu)?,
            embedding_layer_norm: self
                .embedding_layer_norm
                .build(vb.push_prefix("embedding_layer_norm"))
                .context(BuildLayerNormSnafu)?,
            piece_embeddings,
            positions,
            scale: self
                .scale_embeddings
                .then(|| (self.hidden_width as f64).sqrt()),
        }))
    }
}

/// Errors for transformer embeddings.
#[derive(Debug, Snafu)]
pub enum TransformerEmbeddingsError {
    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot construct embeddings layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot normalize embeddings or apply dropout"))]
    NormalizeDropout { source: candle_core::Error },

    #[snafu(display("Cannot lookup piece embeddings"))]
    PieceEmbeddings { source: candle_core::Error },

    #[snafu(display("Cannot lookup position embeddings"))]
    PositionEmbeddingsLookup { source: candle_core::Error },

    #[snafu(display("Cannot apply sinusoidal position embeddings"))]
    Sinusoidal { source: SinusoidalPositionsError },
}

enum PositionLookup {
    Sinusoidal(SinusoidalPositions),
    Learned(Embedding),
    None,
}

/// Transformer embeddings layer.
///
/// Piece embeddings, optionally scaled by `sqrt(hidden_width)`, summed
/// with sinusoidal or learned position embeddings.
pub struct TransformerEmbeddings {
    embedding_dropout: Box<dyn ModuleT>,
    embedding_layer_norm: Box<dyn ModuleT>,
    piece_embeddings: Embedding,
    positions: PositionLookup,
    scale: Option<f64>,
}

impl TransformerEmbeddings {
    /// Get position identifiers _[0..seq_len)_.
    fn get_positions(x: &Tensor) -> Result<Tensor, TransformerEmbeddingsError> {
        let (_, seq_len) = x.shape().dims2().context(PositionEmbeddingsLookupSnafu)?;
        Tensor::arange(0, seq_len as u32, x.device())
            .and_then(|xs| xs.reshape((1, seq_len)))
            .context(PositionEmbeddingsLookupSnafu)
    }

    fn forward_embeddings(
        &self,
        piece_ids: &Tensor,
        train: bool,
        positions: Option<&Tensor>,
    ) -> Result<Tensor, TransformerEmbeddingsError> {
        let mut embeddings = self
            .piece_embeddings
            .forward(piece_ids)
            .context(PieceEmbeddingsSnafu)?;

        if let Some(scale) = self.scale {
            embeddings = embeddings
                .affine(scale, 0.)
                .context(PieceEmbeddingsSnafu)?;
        }

        embeddings = match &self.positions {
            PositionLookup::Sinusoidal(sinusoidal) => {
                let position_embeddings = sinusoidal
                    .forward(piece_ids, positions)
                    .context(SinusoidalSnafu)?;
                embeddings
                    .broadcast_add(&position_embeddings)
                    .context(PositionEmbeddingsLookupSnafu)?
            }
            PositionLookup::Learned(position_embeddings) => {
                let positions = match positions {
                    Some(positions) => positions.clone(),
                    None => Self::get_positions(piece_ids)?,
                };
                position_embeddings
                    .forward(&positions)
                    .and_then(|xs| embeddings.broadcast_add(&xs))
                    .context(PositionEmbeddingsLookupSnafu)?
            }
            PositionLookup::None => embeddings,
        };

        self.embedding_layer_norm
            .forward_t(&embeddings, train)
            .and_then(|xs| self.embedding_dropout.forward_t(&xs, train))
            .context(NormalizeDropoutSnafu)
    }
}

impl Embeddings for TransformerEmbeddings {
    fn forward(
        &self,
        piece_ids: &Tensor,
        train: bool,
        positions: Option<&Tensor>,
    ) -> Result<Tensor, BoxedError> {
        Ok(self.forward_embeddings(piece_ids, train, positions)?)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use rstest::rstest;
    use snafu::{report, FromString, Report, ResultExt, Whatever};

    use super::{PositionEmbeddings, TransformerEmbeddingsConfig};
    use crate::architectures::BuildEmbeddings;

    #[rstest]
    #[case(PositionEmbeddings::Sinusoidal, 1)]
    #[case(PositionEmbeddings::Learned, 2)]
    #[case(PositionEmbeddings::None, 1)]
    fn embeddings_register_parameters(
        #[case] position_embeddings: PositionEmbeddings,
        #[case] n_vars: usize,
    ) -> Report<Whatever> {
        Report::capture(|| {
            let device = Device::Cpu;
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let embeddings = TransformerEmbeddingsConfig::default()
                .hidden_width(8)
                .n_pieces(10)
                .n_positions(16)
                .position_embeddings(position_embeddings)
                .build(vb)
                .map_err(|e| Whatever::with_source(e, "Cannot build embeddings".to_string()))?;
            assert_eq!(varmap.all_vars().len(), n_vars);

            let piece_ids =
                Tensor::new(&[[1u32, 2, 3]], &device).whatever_context("Cannot create pieces")?;
            let output = embeddings
                .forward(&piece_ids, false, None)
                .map_err(|e| Whatever::with_source(e, "Cannot apply embeddings".to_string()))?;
            assert_eq!(output.dims(), &[1, 3, 8]);

            Ok(())
        })
    }

    #[test]
    #[report]
    fn embeddings_are_scaled_by_sqrt_width() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = TransformerEmbeddingsConfig::default()
            .hidden_width(4)
            .n_pieces(5)
            .position_embeddings(PositionEmbeddings::None);
        let scaled = config
            .build(vb.clone())
            .map_err(|e| Whatever::with_source(e, "Cannot build embeddings".to_string()))?;
        let unscaled = TransformerEmbeddingsConfig::default()
            .hidden_width(4)
            .n_pieces(5)
            .position_embeddings(PositionEmbeddings::None)
            .scale_embeddings(false)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build embeddings".to_string()))?;

        let piece_ids = Tensor::new(&[[4u32]], &device).whatever_context("Cannot create pieces")?;
        let scaled = scaled
            .forward(&piece_ids, false, None)
            .map_err(|e| Whatever::with_source(e, "Cannot apply embeddings".to_string()))?;
        let unscaled = unscaled
            .forward(&piece_ids, false, None)
            .map_err(|e| Whatever::with_source(e, "Cannot apply embeddings".to_string()))?;

        crate::util::tests::assert_tensor_eq_::<f32>(
            scaled.i((0, 0)).whatever_context("Cannot index")?,
            (unscaled.i((0, 0)).whatever_context("Cannot index")? * 2.0)
                .whatever_context("Cannot scale")?,
            approx::Relative::default().epsilon(1e-6f32),
        );

        Ok(())
    }
}
