pub mod transformer;

pub mod util;
