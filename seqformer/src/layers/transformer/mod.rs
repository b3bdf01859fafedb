/// Transformer building blocks.
mod embeddings;
pub use embeddings::{
    PositionEmbeddings, TransformerEmbeddings, TransformerEmbeddingsConfig,
    TransformerEmbeddingsError,
};

mod layer;
pub use layer::{
    TransformerDecoderLayer, TransformerEncoderLayer, TransformerLayerConfig,
    TransformerLayerError,
};
