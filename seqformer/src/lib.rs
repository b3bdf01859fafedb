pub mod architectures;
pub mod config;
pub mod data;
pub mod error;
pub mod generation;
pub mod layers;
pub mod models;
pub mod tokenizers;
pub mod training;
pub mod util;
