//! Training, evaluation and prediction.
mod loss;
pub use loss::{masked_accuracy, masked_cross_entropy, LossError};

mod schedule;
pub use schedule::LearningRateSchedule;

mod trainer;
pub use trainer::{Evaluation, Trainer, TrainerError, TrainingSummary};
