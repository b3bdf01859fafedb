use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use seqformer::config::load_config;
use seqformer::data::{Seq2SeqDataset, SpecialPieceIds};
use seqformer::tokenizers::hf_tokenizer::HfTokenizer;
use seqformer::tokenizers::tokenizer::{Tokenizer, TokenizerEncodeInput};
use seqformer::tokenizers::vocab::VocabTokenizer;
use seqformer::training::Trainer;
use seqformer::util::device::select_device;

/// Train and apply sequence-to-sequence transformers.
#[derive(Debug, Parser)]
#[command(name = "seqformer", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train a model and save a checkpoint.
    Train(TrainArgs),

    /// Report the accuracy of a trained model.
    Evaluate(EvaluateArgs),

    /// Translate a text with a trained model.
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Model and training configuration.
    #[arg(long, default_value = "model/config.json")]
    config: PathBuf,

    /// Vocabulary (`vocab.json`) or Hugging Face tokenizer (`tokenizer.json`).
    #[arg(long, default_value = "model/vocab.json")]
    vocab: PathBuf,

    /// Model parameters in safetensors format.
    #[arg(long, default_value = "model/model.safetensors")]
    checkpoint: PathBuf,

    /// Run on the CPU, even when an accelerator is available.
    #[arg(long)]
    cpu: bool,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Training examples, one JSON object with `source` and `target` per line.
    #[arg(long)]
    train_data: PathBuf,

    /// Evaluate on these examples after training.
    #[arg(long)]
    test_data: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Test examples, one JSON object with `source` and `target` per line.
    #[arg(long)]
    test_data: PathBuf,
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Text to translate.
    text: String,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let common = match &self.command {
            Command::Train(args) => &args.common,
            Command::Evaluate(args) => &args.common,
            Command::Predict(args) => &args.common,
        };

        if is_hf_tokenizer(&common.vocab) {
            let tokenizer = HfTokenizer::from_file(&common.vocab)
                .with_context(|| format!("Cannot load tokenizer {}", common.vocab.display()))?;
            run_command(&self.command, &tokenizer)
        } else {
            let tokenizer = VocabTokenizer::from_file(&common.vocab)
                .with_context(|| format!("Cannot load vocabulary {}", common.vocab.display()))?;
            run_command(&self.command, &tokenizer)
        }
    }
}

fn is_hf_tokenizer(path: &Path) -> bool {
    path.file_name()
        .map(|name| name == "tokenizer.json")
        .unwrap_or(false)
}

fn run_command(command: &Command, tokenizer: &impl Tokenizer) -> Result<()> {
    match command {
        Command::Train(args) => train(args, tokenizer),
        Command::Evaluate(args) => evaluate(args, tokenizer),
        Command::Predict(args) => predict(args, tokenizer),
    }
}

fn trainer(common: &CommonArgs, tokenizer: &impl Tokenizer, restore: bool) -> Result<Trainer> {
    let config = load_config(&common.config)?;
    let special_ids = SpecialPieceIds::from_tokenizer(tokenizer)?;
    for id in [special_ids.bos, special_ids.eos, special_ids.pad] {
        if id as usize >= config.model.n_pieces {
            bail!(
                "Special piece {id} does not fit in a model with {} pieces",
                config.model.n_pieces
            );
        }
    }

    let device = select_device(common.cpu).context("Cannot select device")?;
    tracing::info!(?device, "Selected device");

    let trainer = if restore {
        Trainer::from_checkpoint(
            config.model,
            config.training,
            special_ids,
            &common.checkpoint,
            device,
        )?
    } else {
        Trainer::new(config.model, config.training, special_ids, device)?
    };

    Ok(trainer)
}

fn load_dataset(
    path: &Path,
    tokenizer: &impl Tokenizer,
    trainer: &Trainer,
) -> Result<Seq2SeqDataset> {
    Seq2SeqDataset::from_jsonl(path, tokenizer, trainer.max_seq_len())
        .with_context(|| format!("Cannot load dataset {}", path.display()))
}

fn print_accuracy(trainer: &Trainer, dataset: &Seq2SeqDataset) -> Result<()> {
    let evaluation = trainer.evaluate(dataset)?;
    println!("Model accuracy: {:.2}%", evaluation.accuracy * 100.);
    Ok(())
}

fn train(args: &TrainArgs, tokenizer: &impl Tokenizer) -> Result<()> {
    let mut trainer = trainer(&args.common, tokenizer, false)?;
    let dataset = load_dataset(&args.train_data, tokenizer, &trainer)?;
    trainer.train(&dataset)?;
    trainer.save(&args.common.checkpoint)?;

    if let Some(test_data) = &args.test_data {
        let dataset = load_dataset(test_data, tokenizer, &trainer)?;
        print_accuracy(&trainer, &dataset)?;
    }

    Ok(())
}

fn evaluate(args: &EvaluateArgs, tokenizer: &impl Tokenizer) -> Result<()> {
    let trainer = trainer(&args.common, tokenizer, true)?;
    let dataset = load_dataset(&args.test_data, tokenizer, &trainer)?;
    print_accuracy(&trainer, &dataset)
}

fn predict(args: &PredictArgs, tokenizer: &impl Tokenizer) -> Result<()> {
    let trainer = trainer(&args.common, tokenizer, true)?;

    let pieces = tokenizer
        .encode([TokenizerEncodeInput::RawString(args.text.as_str())])
        .map_err(|e| anyhow!(e))
        .context("Cannot encode text")?;
    let source_ids = pieces.ids.first().map(Vec::as_slice).unwrap_or_default();
    let predicted = trainer.predict(source_ids)?;

    let text = tokenizer
        .decode([predicted], true)
        .map_err(|e| anyhow!(e))
        .context("Cannot decode prediction")?;
    println!("Output text: {}", text.join(" "));

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::{CommandFactory, Parser};

    use super::{is_hf_tokenizer, Cli, Command};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tokenizer_kind_follows_file_name() {
        assert!(is_hf_tokenizer(Path::new("model/tokenizer.json")));
        assert!(is_hf_tokenizer(Path::new("tokenizer.json")));
        assert!(!is_hf_tokenizer(Path::new("model/vocab.json")));
        assert!(!is_hf_tokenizer(Path::new("model/tokenizer.json.bak")));
    }

    #[test]
    fn train_uses_default_paths() {
        let cli =
            Cli::try_parse_from(["seqformer", "train", "--train-data", "train.jsonl"]).unwrap();
        let args = match cli.command {
            Command::Train(args) => args,
            other => panic!("Expected train command, got {other:?}"),
        };
        assert_eq!(args.train_data, PathBuf::from("train.jsonl"));
        assert_eq!(args.test_data, None);
        assert_eq!(args.common.config, PathBuf::from("model/config.json"));
        assert_eq!(args.common.vocab, PathBuf::from("model/vocab.json"));
        assert_eq!(
            args.common.checkpoint,
            PathBuf::from("model/model.safetensors")
        );
        assert!(!args.common.cpu);
    }

    #[test]
    fn train_requires_train_data() {
        assert!(Cli::try_parse_from(["seqformer", "train"]).is_err());
    }

    #[test]
    fn evaluate_parses_paths_and_cpu() {
        let cli = Cli::try_parse_from([
            "seqformer",
            "evaluate",
            "--config",
            "run/config.json",
            "--checkpoint",
            "run/model.safetensors",
            "--test-data",
            "test.jsonl",
            "--cpu",
        ])
        .unwrap();
        let args = match cli.command {
            Command::Evaluate(args) => args,
            other => panic!("Expected evaluate command, got {other:?}"),
        };
        assert_eq!(args.test_data, PathBuf::from("test.jsonl"));
        assert_eq!(args.common.config, PathBuf::from("run/config.json"));
        assert_eq!(
            args.common.checkpoint,
            PathBuf::from("run/model.safetensors")
        );
        assert!(args.common.cpu);
    }

    #[test]
    fn evaluate_requires_test_data() {
        assert!(Cli::try_parse_from(["seqformer", "evaluate"]).is_err());
    }

    #[test]
    fn predict_takes_text() {
        let cli = Cli::try_parse_from([
            "seqformer",
            "predict",
            "--vocab",
            "model/tokenizer.json",
            "hello world",
        ])
        .unwrap();
        let args = match cli.command {
            Command::Predict(args) => args,
            other => panic!("Expected predict command, got {other:?}"),
        };
        assert_eq!(args.text, "hello world");
        assert!(is_hf_tokenizer(&args.common.vocab));

        assert!(Cli::try_parse_from(["seqformer", "predict"]).is_err());
    }
}
