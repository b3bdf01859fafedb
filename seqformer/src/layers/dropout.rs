use candle_core::ModuleT;
use candle_nn::{Dropout, VarBuilder};
use snafu::{ensure, Snafu};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Dropout errors.
#[derive(Debug, Snafu)]
pub enum DropoutError {
    #[snafu(display("Dropout probability must be in [0, 1), was {p}"))]
    InvalidProbability { p: f32 },
}

/// Dropout configuration.
#[derive(Clone, Debug)]
pub struct DropoutConfig {
    p: f32,
}

impl DropoutConfig {
    /// Dropout probability.
    ///
    /// Default: `0.0`
    pub fn p(mut self, p: f32) -> Self {
        self.p = p;
        self
    }
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self { p: 0.0 }
    }
}

impl BuildModule for DropoutConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        ensure!(
            (0.0..1.0).contains(&self.p),
            InvalidProbabilitySnafu { p: self.p }
        );

        if self.p == 0.0 {
            return Identity.build(vb);
        }

        Ok(Box::new(Dropout::new(self.p)))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    use super::*;

    #[test]
    fn dropout_is_inactive_outside_training() {
        let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &Device::Cpu);
        let dropout = DropoutConfig::default().p(0.5).build(vb).unwrap();
        let xs = Tensor::ones((2, 8), DType::F32, &Device::Cpu).unwrap();
        let ys = dropout.forward_t(&xs, false).unwrap();
        assert_eq!(
            ys.to_vec2::<f32>().unwrap(),
            xs.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn dropout_rejects_invalid_probability() {
        let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, &Device::Cpu);
        assert!(DropoutConfig::default().p(1.0).build(vb).is_err());
    }
}
