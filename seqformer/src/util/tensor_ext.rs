/// Tensor extension traits.
use candle_core::{DType, Tensor};
use half::{bf16, f16};

/// Get a tensor filled with the data type's minimum value.
pub trait MinLike: Sized {
    /// Get a new tensor with the data type's minimum value.
    ///
    /// The tensor has the same shape, data type, and device as `self`.
    /// Used as the value of masked-out attention logits: after softmax
    /// these logits get a probability of (almost) zero.
    fn min_like(&self) -> Result<Self, candle_core::Error>;
}

impl MinLike for Tensor {
    fn min_like(&self) -> Result<Self, candle_core::Error> {
        match self.dtype() {
            DType::BF16 => Tensor::new(bf16::MIN, self.device()),
            DType::F16 => Tensor::new(f16::MIN, self.device()),
            DType::F32 => Tensor::new(f32::MIN, self.device()),
            DType::F64 => Tensor::new(f64::MIN, self.device()),
            DType::U8 => Tensor::new(u8::MIN, self.device()),
            DType::U32 => Tensor::new(u32::MIN, self.device()),
            DType::I64 => Tensor::new(i64::MIN, self.device()),
        }
        .and_then(|scalar| scalar.broadcast_as(self.shape()))
    }
}
