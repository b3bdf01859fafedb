#[cfg(test)]
pub(crate) mod tests {
    use candle_core::{Device, Tensor};
    use snafu::{ResultExt, Whatever};

    use crate::layers::attention::{AttentionMask, MultiHeadAttentionConfig};
    use crate::layers::feedforward::PointwiseFeedForwardConfig;
    use crate::layers::layer_norm::LayerNormConfig;
    use crate::layers::transformer::{TransformerEmbeddingsConfig, TransformerLayerConfig};
    use crate::models::transformer::{
        TransformerDecoderConfig, TransformerEncoderConfig, TransformerSeq2SeqConfig,
    };

    /// Small model used for most tests: width 8, 2 heads, 2 encoder and
    /// 2 decoder layers, 12 pieces.
    pub fn tiny_seq2seq_config() -> TransformerSeq2SeqConfig {
        let layer = || {
            TransformerLayerConfig::default()
                .attention(MultiHeadAttentionConfig::default().hidden_width(8).n_heads(2))
                .attn_residual_layer_norm(Box::new(LayerNormConfig::default().size(8)))
                .cross_attn_residual_layer_norm(Box::new(LayerNormConfig::default().size(8)))
                .feedforward(
                    PointwiseFeedForwardConfig::default()
                        .hidden_width(8)
                        .intermediate_width(16),
                )
                .ffn_residual_layer_norm(Box::new(LayerNormConfig::default().size(8)))
        };
        let embeddings = || {
            TransformerEmbeddingsConfig::default()
                .hidden_width(8)
                .n_pieces(12)
                .n_positions(16)
        };

        TransformerSeq2SeqConfig::default()
            .encoder(
                TransformerEncoderConfig::default()
                    .embeddings(Box::new(embeddings()))
                    .layer(Box::new(layer()))
                    .n_hidden_layers(2),
            )
            .decoder(
                TransformerDecoderConfig::default()
                    .embeddings(Box::new(embeddings()))
                    .layer(Box::new(layer()))
                    .n_hidden_layers(2),
            )
            .hidden_width(8)
            .n_pieces(12)
    }

    /// Sample source and target inputs with padding.
    ///
    /// Returns source ids, source mask, target ids, and target mask.
    pub fn sample_seq2seq_inputs(
        device: &Device,
    ) -> Result<(Tensor, AttentionMask, Tensor, AttentionMask), Whatever> {
        let source = Tensor::new(&[[4u32, 5, 6, 3, 0], [7, 8, 9, 10, 3]], device)
            .whatever_context("Cannot create source tensor")?;
        let source_mask = Tensor::new(&[[1u32, 1, 1, 1, 0], [1, 1, 1, 1, 1]], device)
            .whatever_context("Cannot create source mask tensor")?;
        let target = Tensor::new(&[[2u32, 6, 5, 0], [2, 10, 9, 8]], device)
            .whatever_context("Cannot create target tensor")?;
        let target_mask = Tensor::new(&[[1u32, 1, 1, 0], [1, 1, 1, 1]], device)
            .whatever_context("Cannot create target mask tensor")?;

        Ok((
            source,
            AttentionMask::new(source_mask).whatever_context("Cannot create attention mask")?,
            target,
            AttentionMask::new(target_mask).whatever_context("Cannot create attention mask")?,
        ))
    }
}
