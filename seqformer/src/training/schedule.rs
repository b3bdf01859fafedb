/// Learning rate schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LearningRateSchedule {
    /// Constant learning rate.
    Constant { learning_rate: f64 },

    /// Linear warmup followed by inverse square root decay, peaking at
    /// `learning_rate` after `warmup_steps` steps.
    InverseSqrt {
        learning_rate: f64,
        warmup_steps: usize,
    },
}

impl LearningRateSchedule {
    /// Inverse square root schedule when `warmup_steps` is non-zero,
    /// constant schedule otherwise.
    pub fn new(learning_rate: f64, warmup_steps: usize) -> Self {
        if warmup_steps == 0 {
            LearningRateSchedule::Constant { learning_rate }
        } else {
            LearningRateSchedule::InverseSqrt {
                learning_rate,
                warmup_steps,
            }
        }
    }

    /// Learning rate of a step, counting from `1`.
    pub fn learning_rate(&self, step: usize) -> f64 {
        match *self {
            LearningRateSchedule::Constant { learning_rate } => learning_rate,
            LearningRateSchedule::InverseSqrt {
                learning_rate,
                warmup_steps,
            } => {
                let step = step.max(1) as f64;
                let warmup_steps = warmup_steps as f64;
                learning_rate * (step / warmup_steps).min((warmup_steps / step).sqrt())
            }
        }
    }
}
