pub mod device;

pub mod tensor_ext;
