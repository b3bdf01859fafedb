/// Feed-forward layers.
use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::activation::Activation;
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Point-wise feed-forward layer configuration.
#[derive(Debug)]
pub struct PointwiseFeedForwardConfig {
    activation: Box<dyn BuildModule>,
    dropout: Box<dyn BuildModule>,
    hidden_width: usize,
    intermediate_width: usize,
    use_bias: bool,
    use_gate: bool,
}

impl PointwiseFeedForwardConfig {
    /// Activation function.
    ///
    /// Default: `Activation::Relu`
    pub fn activation(mut self, activation: Box<dyn BuildModule>) -> Self {
        self.activation = activation;
        self
    }

    /// Dropout to apply after the layer.
    ///
    /// Default: `Identity`
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Hidden width, dimensionality of the layer input and output.
    ///
    /// Default: `512`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Intermediate width inside the feed-forward layer.
    ///
    /// Default: `2048`
    pub fn intermediate_width(mut self, intermediate_width: usize) -> Self {
        self.intermediate_width = intermediate_width;
        self
    }

    /// Use bias in the linear transformations.
    ///
    /// Default: `true`
    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Use Gated Linear Units.
    ///
    /// Default: `false`
    pub fn use_gate(mut self, use_gate: bool) -> Self {
        self.use_gate = use_gate;
        self
    }
}

impl Default for PointwiseFeedForwardConfig {
    fn default() -> Self {
        Self {
            activation: Box::new(Activation::Relu),
            dropout: Box::new(Identity),
            hidden_width: 512,
            intermediate_width: 2048,
            use_bias: true,
            use_gate: false,
        }
    }
}

impl BuildModule for PointwiseFeedForwardConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        let linear_ctor = if self.use_bias {
            linear
        } else {
            linear_no_bias
        };

        let intermediate = linear_ctor(
            self.hidden_width,
            self.intermediate_width,
            vb.push_prefix("intermediate"),
        )
        .context(ConstructionSnafu)?;

        let gate = if self.use_gate {
            Some(
                linear_ctor(
                    self.hidden_width,
                    self.intermediate_width,
                    vb.push_prefix("gate"),
                )
                .context(ConstructionSnafu)?,
            )
        } else {
            None
        };

        let output = linear_ctor(
            self.intermediate_width,
            self.hidden_width,
            vb.push_prefix("output"),
        )
        .context(ConstructionSnafu)?;

        Ok(Box::new(PointwiseFeedForward {
            activation: self
                .activation
                .build(vb.push_prefix("activation"))
                .context(BuildActivationSnafu)?,
            dropout: self
                .dropout
                .build(vb.push_prefix("dropout"))
                .context(BuildDropoutSnafu)?,
            gate,
            intermediate,
            output,
        }))
    }
}

/// Errors for point-wise feed-forward layers.
#[derive(Debug, Snafu)]
pub enum PointwiseFeedForwardError {
    #[snafu(display("Cannot build activation"))]
    BuildActivation { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot construct layer"))]
    Construction { source: candle_core::Error },
}

/// Point-wise feed-forward layer (_Vaswani et al., 2017_).
///
/// This layer is applied pointwise, meaning that the same
/// transformation is applied to each sequence element. This
/// transformation is:
///
/// `g(xW_1 + b_1)W_2 + b_2`
///
/// `W_1` and `b_1` transform the input to an
/// intermediate width, `g` is a non-linear activation
/// function and `W_2` and `b_2` transform the
/// output of the activation back to the input width.
///
/// Gated Linear Units (_Dauphin et al., 2016_; _Shazeer, 2020_) are also
/// supported. Gating applies the following transformation:
///
/// `(g(xW_g + b_g) * (xW_1 + b_1))W_2 + b_2`
///
/// `W_g` and _b_g_ are the affine transformation for the gate.
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
/// * _Dauphin et al., 2016_: https://arxiv.org/abs/1612.08083
/// * _Shazeer, 2020_: https://arxiv.org/abs/2002.05202
pub struct PointwiseFeedForward {
    activation: Box<dyn ModuleT>,
    dropout: Box<dyn ModuleT>,
    gate: Option<Linear>,
    intermediate: Linear,
    output: Linear,
}

impl ModuleT for PointwiseFeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, candle_core::Error> {
        let hidden = match &self.gate {
            Some(gate) => self
                .activation
                .forward_t(&gate.forward(xs)?, train)?
                .mul(&self.intermediate.forward(xs)?)?,
            None => self
                .activation
                .forward_t(&self.intermediate.forward(xs)?, train)?,
        };

        let output = self.output.forward(&hidden)?;
        self.dropout.forward_t(&output, train)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, IndexOp, ModuleT, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use crate::layers::build_module::BuildModule;
    use crate::layers::feedforward::PointwiseFeedForwardConfig;
    use crate::util::device::tests::test_devices;
    use crate::util::tests::PseudoRandom;

    #[test]
    #[report]
    fn feedforward_is_applied_pointwise() -> Result<(), Whatever> {
        for device in test_devices() {
            let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &device);
            let ffn = PointwiseFeedForwardConfig::default()
                .hidden_width(4)
                .intermediate_width(16)
                .use_gate(true)
                .build(vb)
                .map_err(|e| Whatever::with_source(e, "Cannot build layer".to_string()))?;

            let xs = Tensor::pseudo_random(&[1, 3, 4], &device);
            let ys = ffn
                .forward_t(&xs, false)
                .whatever_context("Cannot apply layer")?;
            assert_eq!(ys.dims(), &[1, 3, 4]);

            // Applying the layer to a single position gives the same result.
            let single = ffn
                .forward_t(&xs.i((.., 1..2, ..)).whatever_context("Cannot slice")?, false)
                .whatever_context("Cannot apply layer")?;
            crate::util::tests::assert_tensor_eq_::<f32>(
                ys.i((.., 1..2, ..)).whatever_context("Cannot slice")?,
                single,
                approx::Relative::default().epsilon(1e-6f32),
            );
        }

        Ok(())
    }
}
