use candle_core::{DType, Tensor, D};
use candle_nn::ops::log_softmax;
use snafu::{ensure, ResultExt, Snafu};

/// Loss errors.
#[derive(Debug, Snafu)]
pub enum LossError {
    #[snafu(display("Cannot compute loss"))]
    Compute { source: candle_core::Error },

    #[snafu(display("Label mask does not contain any tokens"))]
    NoTokens,
}

/// Masked token-level cross entropy.
///
/// * `logits` - Piece logits.
///   *Shape:* `(batch_size, seq_len, n_pieces)`
/// * `labels` - Pieces to predict.
///   *Shape:* `(batch_size, seq_len)`
/// * `label_mask` - `1.0` for positions that contribute to the loss,
///   `0.0` otherwise.
///   *Shape:* `(batch_size, seq_len)`
///
/// Returns the mean negative log-likelihood of the unmasked labels.
pub fn masked_cross_entropy(
    logits: &Tensor,
    labels: &Tensor,
    label_mask: &Tensor,
) -> Result<Tensor, LossError> {
    let n_tokens = label_mask
        .sum_all()
        .and_then(|n| n.to_dtype(DType::F32))
        .and_then(|n| n.to_scalar::<f32>())
        .context(ComputeSnafu)?;
    ensure!(n_tokens > 0., NoTokensSnafu);

    let logits = logits.to_dtype(DType::F32).context(ComputeSnafu)?;
    let log_probs = log_softmax(&logits, D::Minus1).context(ComputeSnafu)?;
    let label_log_probs = labels
        .to_dtype(DType::U32)
        .and_then(|labels| labels.unsqueeze(D::Minus1))
        .and_then(|labels| log_probs.gather(&labels, D::Minus1))
        .and_then(|xs| xs.squeeze(D::Minus1))
        .context(ComputeSnafu)?;

    (label_log_probs * label_mask.to_dtype(DType::F32).context(ComputeSnafu)?)
        .and_then(|xs| xs.sum_all())
        .and_then(|xs| xs.affine(-1. / n_tokens as f64, 0.))
        .context(ComputeSnafu)
}

/// Count correctly predicted pieces.
///
/// Returns the number of unmasked positions where the most probable piece
/// is the label, and the number of unmasked positions.
pub fn masked_accuracy(
    logits: &Tensor,
    labels: &Tensor,
    label_mask: &Tensor,
) -> Result<(f32, f32), LossError> {
    let label_mask = label_mask.to_dtype(DType::F32).context(ComputeSnafu)?;
    let correct = logits
        .argmax(D::Minus1)
        .and_then(|predicted| predicted.eq(&labels.to_dtype(DType::U32)?))
        .and_then(|correct| correct.to_dtype(DType::F32))
        .and_then(|correct| correct * &label_mask)
        .and_then(|correct| correct.sum_all())
        .and_then(|correct| correct.to_scalar::<f32>())
        .context(ComputeSnafu)?;
    let n_tokens = label_mask
        .sum_all()
        .and_then(|n| n.to_scalar::<f32>())
        .context(ComputeSnafu)?;
    Ok((correct, n_tokens))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use candle_core::{Device, Tensor};
    use snafu::{report, ResultExt, Whatever};

    use super::{masked_accuracy, masked_cross_entropy, LossError};

    #[test]
    #[report]
    fn cross_entropy_ignores_masked_positions() -> Result<(), Whatever> {
        let device = Device::Cpu;
        // Uniform over two pieces, then certain of piece 0.
        let logits = Tensor::new(&[[[0f32, 0.], [100., 0.]]], &device)
            .whatever_context("Cannot create logits")?;
        let labels =
            Tensor::new(&[[1u32, 1]], &device).whatever_context("Cannot create labels")?;

        let mask = Tensor::new(&[[1f32, 0.]], &device).whatever_context("Cannot create mask")?;
        let loss = masked_cross_entropy(&logits, &labels, &mask)
            .whatever_context("Cannot compute loss")?
            .to_scalar::<f32>()
            .whatever_context("Cannot read loss")?;
        assert_relative_eq!(loss, 2f32.ln(), epsilon = 1e-5);

        let mask = Tensor::new(&[[1f32, 1.]], &device).whatever_context("Cannot create mask")?;
        let loss = masked_cross_entropy(&logits, &labels, &mask)
            .whatever_context("Cannot compute loss")?
            .to_scalar::<f32>()
            .whatever_context("Cannot read loss")?;
        assert_relative_eq!(loss, (2f32.ln() + 100.) / 2., epsilon = 1e-3);

        Ok(())
    }

    #[test]
    fn cross_entropy_rejects_empty_mask() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 2, 3), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::new(&[[1u32, 1]], &device).unwrap();
        let mask = Tensor::zeros((1, 2), candle_core::DType::F32, &device).unwrap();
        assert!(matches!(
            masked_cross_entropy(&logits, &labels, &mask),
            Err(LossError::NoTokens)
        ));
    }

    #[test]
    #[report]
    fn accuracy_counts_unmasked_positions() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[[0f32, 1.], [1., 0.], [1., 0.]]], &device)
            .whatever_context("Cannot create logits")?;
        let labels =
            Tensor::new(&[[1u32, 1, 0]], &device).whatever_context("Cannot create labels")?;
        let mask =
            Tensor::new(&[[1f32, 1., 0.]], &device).whatever_context("Cannot create mask")?;
        let (correct, n_tokens) =
            masked_accuracy(&logits, &labels, &mask).whatever_context("Cannot compute accuracy")?;
        assert_eq!(correct, 1.);
        assert_eq!(n_tokens, 2.);
        Ok(())
    }
}
