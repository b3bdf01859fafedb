use candle_core::{DType, Module, ModuleT, Tensor, D};
use candle_nn::{init, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// Layer norm errors.
#[derive(Debug, Snafu)]
pub enum LayerNormError {
    #[snafu(display("Cannot construct layer norm parameters"))]
    Construction { source: candle_core::Error },
}

/// Layer normalization.
///
/// See [Ba et al., 2016](https://arxiv.org/abs/1607.06450).
///
/// Normalizes the last dimension of the input to zero mean and unit
/// variance, followed by an optional affine transformation:
///
/// `y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
///
/// When `remove_mean` is disabled, the mean is not subtracted and the
/// layer is equivalent to RMS normalization
/// ([Zhang & Sennrich, 2019](https://arxiv.org/abs/1910.07467)).
#[derive(Debug)]
pub struct LayerNorm {
    bias: Option<Tensor>,
    eps: f64,
    remove_mean: bool,
    weight: Option<Tensor>,
}

impl LayerNorm {
    /// Construct a layer normalization module.
    ///
    /// * `vb` - Variable store.
    /// * `config` - Layer norm configuration.
    pub fn new(vb: VarBuilder, config: &LayerNormConfig) -> Result<Self, LayerNormError> {
        let (weight, bias) = if config.affine {
            let weight = vb
                .get_with_hints(config.size, "weight", init::ONE)
                .context(ConstructionSnafu)?;
            let bias = if config.remove_mean {
                Some(
                    vb.get_with_hints(config.size, "bias", init::ZERO)
                        .context(ConstructionSnafu)?,
                )
            } else {
                None
            };
            (Some(weight), bias)
        } else {
            (None, None)
        };

        Ok(LayerNorm {
            bias,
            eps: config.eps,
            remove_mean: config.remove_mean,
            weight,
        })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        // Statistics are computed in float32, squaring in narrower types
        // loses too much precision.
        let dtype = xs.dtype();
        let mut xs = xs.to_dtype(DType::F32)?;

        if self.remove_mean {
            let mean = xs.mean_keepdim(D::Minus1)?;
            xs = xs.broadcast_sub(&mean)?;
        }

        let var = xs.sqr()?.mean_keepdim(D::Minus1)?;
        let mut xs = xs.broadcast_div(&(var + self.eps)?.sqrt()?)?.to_dtype(dtype)?;

        if let Some(weight) = &self.weight {
            xs = xs.broadcast_mul(weight)?;
        }

        match &self.bias {
            Some(bias) => xs.broadcast_add(bias),
            None => Ok(xs),
        }
    }
}

/// Layer norm configuration.
#[derive(Clone, Debug)]
pub struct LayerNormConfig {
    pub affine: bool,
    pub eps: f64,
    pub remove_mean: bool,
    pub size: usize,
}

impl LayerNormConfig {
    /// Whether to use an affine transformation.
    ///
    /// Default: `true`
    pub fn affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    /// Epsilon value.
    ///
    /// Default: `1e-5`
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Whether to remove the mean.
    ///
    /// If the mean is not removed, this layer is equivalent to `RMSNorm`.
    ///
    /// Default: `true`
    pub fn remove_mean(mut self, remove_mean: bool) -> Self {
        self.remove_mean = remove_mean;
        self
    }

    /// Dimensionality of the layer.
    ///
    /// Default: `512`
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self {
            affine: true,
            eps: 1e-5,
            remove_mean: true,
            size: 512,
        }
    }
}

impl BuildModule for LayerNormConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        Ok(Box::new(LayerNorm::new(vb, self)?))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor, D};
    use candle_nn::{VarBuilder, VarMap};
    use ndarray::array;
    use snafu::{report, FromString, ResultExt, Whatever};

    use crate::layers::build_module::BuildModule;
    use crate::layers::layer_norm::LayerNormConfig;
    use crate::util::device::tests::test_devices;
    use crate::util::tests::assert_tensor_eq;

    #[test]
    #[report]
    fn layer_norm_normalizes_last_dimension() -> Result<(), Whatever> {
        for device in test_devices() {
            let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &device);
            let layer_norm = LayerNormConfig::default()
                .size(4)
                .build(vb)
                .map_err(|e| Whatever::with_source(e, "Cannot build layer norm".to_string()))?;

            let xs = Tensor::from_slice(&[1f32, 2., 3., 4., -2., 0., 2., 4.], (2, 4), &device)
                .whatever_context("Cannot create input")?;
            let ys = layer_norm
                .forward_t(&xs, false)
                .whatever_context("Cannot apply layer norm")?;

            // Both rows have variance 1.25 and 5.0 around means 2.5 and 1.0.
            let a = 1.0 / (1.25f32 + 1e-5).sqrt();
            let b = 1.0 / (5.0f32 + 1e-5).sqrt();
            assert_tensor_eq!(
                ys,
                array![
                    [-1.5 * a, -0.5 * a, 0.5 * a, 1.5 * a],
                    [-3.0 * b, -1.0 * b, 1.0 * b, 3.0 * b]
                ],
                epsilon = 1e-5,
            );
        }

        Ok(())
    }

    #[test]
    #[report]
    fn rms_norm_keeps_mean() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &device);
        let rms_norm = LayerNormConfig::default()
            .size(2)
            .remove_mean(false)
            .eps(0.0)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build RMS norm".to_string()))?;

        let xs = Tensor::from_slice(&[3f32, 4.], (1, 2), &device)
            .whatever_context("Cannot create input")?;
        let ys = rms_norm
            .forward_t(&xs, false)
            .and_then(|ys| ys.mean(D::Minus1))
            .whatever_context("Cannot apply RMS norm")?;

        // rms = sqrt((9 + 16) / 2), mean of (3, 4) / rms.
        let expected = 3.5 / (12.5f32).sqrt();
        assert_tensor_eq!(ys, array![expected], epsilon = 1e-5);

        Ok(())
    }
}
