//! Sequence generation.
mod greedy;
pub use greedy::{GreedyGenerator, GreedyGeneratorError};
