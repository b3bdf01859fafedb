use std::fmt::Debug;

use candle_core::ModuleT;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Configurations that can build a module.
///
/// Layers take boxed `BuildModule` values for their dropout and
/// normalization.
pub trait BuildModule: Debug {
    /// Build a module.
    ///
    /// * `vb` - Variable builder used for the module's parameters.
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError>;
}
