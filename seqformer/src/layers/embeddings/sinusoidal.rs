use candle_core::{DType, Device, Module, Tensor};
use candle_nn::Embedding;
use snafu::{ensure, ResultExt, Snafu};

/// Errors for sinusoidal position embeddings.
#[derive(Debug, Snafu)]
pub enum SinusoidalPositionsError {
    #[snafu(display("Cannot create sinusoidal position table"))]
    CreateTable { source: candle_core::Error },

    #[snafu(display("Sinusoidal position width must be even, was {width}"))]
    OddWidth { width: usize },

    #[snafu(display("Cannot look up positions"))]
    Positions { source: candle_core::Error },

    #[snafu(display("Position {position} exceeds the maximum sequence length {max_len}"))]
    SequenceTooLong { max_len: usize, position: usize },
}

/// Sinusoidal position embeddings (_Vaswani et al., 2017_).
///
/// Position `pos` is encoded as:
///
/// * `PE(pos, 2i) = sin(pos / 10000^(2i/width))`
/// * `PE(pos, 2i+1) = cos(pos / 10000^(2i/width))`
///
/// The table is computed once for `max_len` positions and is not trained.
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
#[derive(Clone, Debug)]
pub struct SinusoidalPositions {
    max_len: usize,
    table: Tensor,
}

impl SinusoidalPositions {
    /// Construct the position table.
    ///
    /// * `width` - Embedding width, must be even.
    /// * `max_len` - Maximum number of positions.
    /// * `dtype` - Data type of the table.
    /// * `device` - Device to place the table on.
    pub fn new(
        width: usize,
        max_len: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self, SinusoidalPositionsError> {
        ensure!(width % 2 == 0, OddWidthSnafu { width });

        let mut data = vec![0f32; max_len * width];
        for pos in 0..max_len {
            for i in (0..width).step_by(2) {
                let angle = pos as f64 / 10_000f64.powf(i as f64 / width as f64);
                data[pos * width + i] = angle.sin() as f32;
                data[pos * width + i + 1] = angle.cos() as f32;
            }
        }

        let table = Tensor::from_vec(data, (max_len, width), device)
            .and_then(|table| table.to_dtype(dtype))
            .context(CreateTableSnafu)?;

        Ok(SinusoidalPositions { max_len, table })
    }

    /// Look up the position embeddings.
    ///
    /// * `piece_ids` - Pieces to get position embeddings for.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `positions` - Positions of the pieces. When absent, the positions
    ///   `[0..seq_len)` are used.
    ///   *Shape:* `(batch_size, seq_len)`
    ///
    /// Returns: position embeddings.
    /// *Shape:* `(1, seq_len, width)` or `(batch_size, seq_len, width)` when
    /// positions are given.
    pub fn forward(
        &self,
        piece_ids: &Tensor,
        positions: Option<&Tensor>,
    ) -> Result<Tensor, SinusoidalPositionsError> {
        match positions {
            Some(positions) => {
                let positions = positions.to_dtype(DType::U32).context(PositionsSnafu)?;
                let max_position = positions
                    .max_all()
                    .and_then(|max| max.to_scalar::<u32>())
                    .context(PositionsSnafu)? as usize;
                ensure!(
                    max_position < self.max_len,
                    SequenceTooLongSnafu {
                        max_len: self.max_len,
                        position: max_position
                    }
                );

                let (_, width) = self.table.dims2().context(PositionsSnafu)?;
                Embedding::new(self.table.clone(), width)
                    .forward(&positions)
                    .context(PositionsSnafu)
            }
            None => {
                let (_, seq_len) = piece_ids.dims2().context(PositionsSnafu)?;
                ensure!(
                    seq_len <= self.max_len,
                    SequenceTooLongSnafu {
                        max_len: self.max_len,
                        position: seq_len.saturating_sub(1)
                    }
                );
                self.table
                    .narrow(0, 0, seq_len)
                    .and_then(|xs| xs.unsqueeze(0))
                    .context(PositionsSnafu)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use ndarray::array;
    use snafu::{report, ResultExt, Whatever};

    use super::SinusoidalPositions;
    use crate::util::tests::assert_tensor_eq;

    #[test]
    #[report]
    fn sinusoidal_positions_are_correct() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let positions = SinusoidalPositions::new(4, 8, DType::F32, &device)
            .whatever_context("Cannot create positions")?;
        let piece_ids =
            Tensor::zeros((1, 3), DType::U32, &device).whatever_context("Cannot create pieces")?;

        let embeddings = positions
            .forward(&piece_ids, None)
            .whatever_context("Cannot look up positions")?;
        assert_eq!(embeddings.dims(), &[1, 3, 4]);

        assert_tensor_eq!(
            embeddings.i(0).whatever_context("Cannot index")?,
            array![
                [0.0f32, 1.0, 0.0, 1.0],
                [0.841471, 0.540302, 0.009999833, 0.99995],
                [0.909297, -0.416147, 0.019998667, 0.9998]
            ],
            epsilon = 1e-5,
        );

        Ok(())
    }

    #[test]
    #[report]
    fn sinusoidal_positions_accept_explicit_positions() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let positions = SinusoidalPositions::new(4, 8, DType::F32, &device)
            .whatever_context("Cannot create positions")?;
        let piece_ids =
            Tensor::zeros((2, 2), DType::U32, &device).whatever_context("Cannot create pieces")?;
        let explicit = Tensor::new(&[[0u32, 1], [2, 3]], &device)
            .whatever_context("Cannot create positions tensor")?;

        let embeddings = positions
            .forward(&piece_ids, Some(&explicit))
            .whatever_context("Cannot look up positions")?;
        assert_eq!(embeddings.dims(), &[2, 2, 4]);

        Ok(())
    }

    #[test]
    fn sinusoidal_positions_reject_odd_width_and_long_sequences() {
        let device = Device::Cpu;
        assert!(SinusoidalPositions::new(5, 8, DType::F32, &device).is_err());

        let positions = SinusoidalPositions::new(4, 2, DType::F32, &device).unwrap();
        let piece_ids = Tensor::zeros((1, 3), DType::U32, &device).unwrap();
        assert!(positions.forward(&piece_ids, None).is_err());
    }
}
