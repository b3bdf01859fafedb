use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use snafu::{ensure, ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::architectures::{BuildSeq2SeqModel, Seq2SeqModel};
use crate::config::{ConfigError, ModelConfig, ModelConfigError, TrainingConfig};
use crate::data::{
    Seq2SeqBatch, Seq2SeqBatchError, Seq2SeqDataset, Seq2SeqDatasetError, Seq2SeqExample,
    SpecialPieceIds,
};
use crate::error::BoxedError;
use crate::generation::{GreedyGenerator, GreedyGeneratorError};
use crate::models::transformer::{TransformerSeq2Seq, TransformerSeq2SeqConfig};
use crate::training::{masked_accuracy, masked_cross_entropy, LearningRateSchedule, LossError};

/// Trainer errors.
#[derive(Debug, Snafu)]
pub enum TrainerError {
    #[snafu(display("Cannot create batch"))]
    Batch { source: Seq2SeqBatchError },

    #[snafu(display("Cannot build model"))]
    BuildModel { source: BoxedError },

    #[snafu(display("Cannot {operation} an empty dataset"))]
    EmptyDataset { operation: &'static str },

    #[snafu(display("Cannot frame source sequence"))]
    Example { source: Seq2SeqDatasetError },

    #[snafu(display("Cannot generate target sequence"))]
    Generate { source: GreedyGeneratorError },

    #[snafu(display("Invalid model configuration"))]
    InvalidModel { source: ModelConfigError },

    #[snafu(display("Invalid training configuration"))]
    InvalidTraining { source: ConfigError },

    #[snafu(display("Cannot load checkpoint: {}", path.to_string_lossy()))]
    Load {
        source: candle_core::Error,
        path: PathBuf,
    },

    #[snafu(display("Cannot compute loss"))]
    Loss { source: LossError },

    #[snafu(display("Cannot apply model"))]
    Model { source: BoxedError },

    #[snafu(display("Cannot update parameters"))]
    Optimizer { source: candle_core::Error },

    #[snafu(display("Piece {id} is out of range for a model with {n_pieces} pieces"))]
    PieceOutOfRange { id: u32, n_pieces: usize },

    #[snafu(display("Cannot read loss"))]
    ReadLoss { source: candle_core::Error },

    #[snafu(display("Cannot save checkpoint: {}", path.to_string_lossy()))]
    Save {
        source: candle_core::Error,
        path: PathBuf,
    },
}

/// Losses of a training run.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSummary {
    /// Mean batch loss of each epoch.
    pub epoch_losses: Vec<f32>,

    /// Number of optimizer steps taken.
    pub steps: usize,
}

/// Evaluation results.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Mean cross entropy per target piece.
    pub loss: f32,

    /// Fraction of correctly predicted target pieces, in `[0, 1]`.
    pub accuracy: f32,

    /// Number of target pieces.
    pub n_tokens: usize,
}

/// Trains and applies a transformer sequence-to-sequence model.
pub struct Trainer {
    device: Device,
    model: TransformerSeq2Seq,
    model_config: ModelConfig,
    special_ids: SpecialPieceIds,
    step: usize,
    training_config: TrainingConfig,
    varmap: VarMap,
}

impl Trainer {
    /// Build a randomly initialized model.
    ///
    /// * `model_config` - Model hyperparameters.
    /// * `training_config` - Training hyperparameters.
    /// * `special_ids` - Special pieces used to frame sequences.
    /// * `device` - Device to place the model on.
    pub fn new(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        special_ids: SpecialPieceIds,
        device: Device,
    ) -> Result<Self, TrainerError> {
        training_config.validate().context(InvalidTrainingSnafu)?;
        let seq2seq_config =
            TransformerSeq2SeqConfig::try_from(&model_config).context(InvalidModelSnafu)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = seq2seq_config.build(vb).context(BuildModelSnafu)?;

        let n_parameters: usize = varmap.all_vars().iter().map(|var| var.elem_count()).sum();
        debug!(n_parameters, ?device, "Built model");

        Ok(Trainer {
            device,
            model,
            model_config,
            special_ids,
            step: 0,
            training_config,
            varmap,
        })
    }

    /// Build a model and load its parameters from a checkpoint.
    pub fn from_checkpoint(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        special_ids: SpecialPieceIds,
        path: impl AsRef<Path>,
        device: Device,
    ) -> Result<Self, TrainerError> {
        let mut trainer = Self::new(model_config, training_config, special_ids, device)?;
        trainer.load(path)?;
        Ok(trainer)
    }

    /// The model.
    pub fn model(&self) -> &TransformerSeq2Seq {
        &self.model
    }

    /// Maximum sequence length of the model, including special pieces.
    pub fn max_seq_len(&self) -> usize {
        self.model_config.max_seq_len
    }

    /// Number of optimizer steps taken so far.
    pub fn step(&self) -> usize {
        self.step
    }

    fn check_piece_ids(&self, ids: &[u32]) -> Result<(), TrainerError> {
        let n_pieces = self.model_config.n_pieces;
        match ids.iter().find(|&&id| id as usize >= n_pieces) {
            Some(&id) => PieceOutOfRangeSnafu { id, n_pieces }.fail(),
            None => Ok(()),
        }
    }

    fn batch(&self, examples: &[&Seq2SeqExample]) -> Result<Seq2SeqBatch, TrainerError> {
        for example in examples {
            self.check_piece_ids(&example.source_ids)?;
            self.check_piece_ids(&example.target_ids)?;
        }
        Seq2SeqBatch::new(examples, self.special_ids.pad, &self.device).context(BatchSnafu)
    }

    fn logits(&self, batch: &Seq2SeqBatch, train: bool) -> Result<Tensor, TrainerError> {
        let output = self
            .model
            .forward_t(
                &batch.source_ids,
                &batch.source_mask,
                &batch.target_ids,
                &batch.target_mask,
                train,
            )
            .context(ModelSnafu)?;
        Ok(output.logits().clone())
    }

    /// Train the model.
    ///
    /// Examples are shuffled every epoch, with a seed derived from the
    /// configured seed and the epoch.
    pub fn train(&mut self, dataset: &Seq2SeqDataset) -> Result<TrainingSummary, TrainerError> {
        ensure!(
            !dataset.is_empty(),
            EmptyDatasetSnafu {
                operation: "train on"
            }
        );

        let config = &self.training_config;
        let schedule = LearningRateSchedule::new(config.learning_rate, config.warmup_steps);
        let params = ParamsAdamW {
            lr: schedule.learning_rate(self.step + 1),
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params).context(OptimizerSnafu)?;

        info!(
            n_examples = dataset.len(),
            epochs = config.epochs,
            batch_size = config.batch_size,
            "Training"
        );

        let (epochs, batch_size, seed) = (config.epochs, config.batch_size, config.seed);
        let mut epoch_losses = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let batches = dataset.batches(batch_size, Some(seed.wrapping_add(epoch as u64)));
            let mut loss_sum = 0f32;
            for examples in &batches {
                let batch = self.batch(examples)?;

                self.step += 1;
                optimizer.set_learning_rate(schedule.learning_rate(self.step));
                let logits = self.logits(&batch, true)?;
                let loss = masked_cross_entropy(&logits, &batch.labels, &batch.label_mask)
                    .context(LossSnafu)?;
                optimizer.backward_step(&loss).context(OptimizerSnafu)?;

                let loss = loss.to_scalar::<f32>().context(ReadLossSnafu)?;
                debug!(step = self.step, loss, "Batch");
                loss_sum += loss;
            }

            let loss = loss_sum / batches.len() as f32;
            if !loss.is_finite() {
                warn!(epoch = epoch + 1, "Loss is not finite");
            }
            info!(epoch = epoch + 1, loss, "Finished epoch");
            epoch_losses.push(loss);
        }

        Ok(TrainingSummary {
            epoch_losses,
            steps: self.step,
        })
    }

    /// Evaluate the model with teacher forcing.
    pub fn evaluate(&self, dataset: &Seq2SeqDataset) -> Result<Evaluation, TrainerError> {
        ensure!(
            !dataset.is_empty(),
            EmptyDatasetSnafu {
                operation: "evaluate on"
            }
        );

        let mut loss_sum = 0f32;
        let mut correct = 0f32;
        let mut n_tokens = 0f32;
        for examples in dataset.batches(self.training_config.batch_size, None) {
            let batch = self.batch(&examples)?;
            let logits = self.logits(&batch, false)?;

            let (batch_correct, batch_tokens) =
                masked_accuracy(&logits, &batch.labels, &batch.label_mask).context(LossSnafu)?;
            let loss = masked_cross_entropy(&logits, &batch.labels, &batch.label_mask)
                .context(LossSnafu)?
                .to_scalar::<f32>()
                .context(ReadLossSnafu)?;

            loss_sum += loss * batch_tokens;
            correct += batch_correct;
            n_tokens += batch_tokens;
        }

        let evaluation = Evaluation {
            loss: loss_sum / n_tokens,
            accuracy: correct / n_tokens,
            n_tokens: n_tokens as usize,
        };
        info!(
            loss = evaluation.loss,
            accuracy = evaluation.accuracy,
            n_tokens = evaluation.n_tokens,
            "Evaluated"
        );

        Ok(evaluation)
    }

    /// Predict the target pieces of a source sequence.
    ///
    /// The source is truncated and framed like training examples. At most
    /// `max_predict_len` pieces are generated.
    pub fn predict(&self, source_ids: &[u32]) -> Result<Vec<u32>, TrainerError> {
        self.check_piece_ids(source_ids)?;
        let max_seq_len = self.model_config.max_seq_len;
        let example = Seq2SeqExample::new(source_ids, &[], self.special_ids, max_seq_len)
            .context(ExampleSnafu)?;

        let max_len = self
            .training_config
            .max_predict_len
            .min(max_seq_len.saturating_sub(1));
        GreedyGenerator::new(self.special_ids.bos, self.special_ids.eos, max_len)
            .generate(&self.model, &example.source_ids, &self.device)
            .context(GenerateSnafu)
    }

    /// Save all model parameters in safetensors format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TrainerError> {
        let path = path.as_ref();
        self.varmap.save(path).context(SaveSnafu { path })?;
        info!(path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    /// Load all model parameters from a safetensors checkpoint.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), TrainerError> {
        let path = path.as_ref();
        self.varmap.load(path).context(LoadSnafu { path })?;
        info!(path = %path.display(), "Loaded checkpoint");
        Ok(())
    }
}
