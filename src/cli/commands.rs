// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their configurable flags. Model flags are shared through a
// flattened ModelArgs group.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, Activation, ...)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::{
    config::ModelSettings,
    evaluate_use_case::EvalConfig,
    train_use_case::TrainConfig,
};
use crate::ml::model::Activation;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune the dialogue model
    Train(TrainArgs),

    /// Report validation loss and perplexity of a checkpoint
    Evaluate(EvaluateArgs),
}

/// Architecture flags, shared by both subcommands.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Number of transformer layers
    #[arg(long, default_value_t = 12)]
    pub num_layers: usize,

    /// Hidden size; must be divisible by --nhead
    #[arg(long, default_value_t = 768)]
    pub d_model: usize,

    /// Number of attention heads
    #[arg(long, default_value_t = 12)]
    pub nhead: usize,

    /// Dropout probability
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Hidden activation: gelu or relu
    #[arg(long, default_value_t = Activation::Gelu)]
    pub activation: Activation,

    /// Layer norm before (true) or after (false) each sublayer
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub normalize_before: bool,

    /// Number of segment types (context, response)
    #[arg(long, default_value_t = 2)]
    pub type_size: usize,

    /// Longest token sequence (context + response)
    #[arg(long, default_value_t = 512)]
    pub max_seq_len: usize,

    /// Minimum decoded response length
    #[arg(long, default_value_t = 1)]
    pub min_dec_len: usize,

    /// Maximum decoded response length
    #[arg(long, default_value_t = 64)]
    pub max_dec_len: usize,

    /// Top-k sampling width
    #[arg(long, default_value_t = 4)]
    pub topk: usize,
}

impl From<ModelArgs> for ModelSettings {
    fn from(a: ModelArgs) -> Self {
        ModelSettings {
            num_layers:       a.num_layers,
            d_model:          a.d_model,
            nhead:            a.nhead,
            dropout:          a.dropout,
            activation:       a.activation,
            normalize_before: a.normalize_before,
            type_size:        a.type_size,
            max_seq_len:      a.max_seq_len,
            min_dec_len:      a.min_dec_len,
            max_dec_len:      a.max_dec_len,
            topk:             a.topk,
        }
    }
}

/// All arguments for the `train` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Number of GPUs; 0 trains on the CPU, more than 1 runs one replica per GPU
    #[arg(long, default_value_t = 1)]
    pub n_gpus: usize,

    /// Random seed for initialisation and batch shuffling
    #[arg(long, default_value_t = 2021)]
    pub seed: u64,

    /// Directory for checkpoints, config and metrics
    #[arg(long, default_value = "checkpoints")]
    pub save_dir: String,

    /// Checkpoint prefix to start from, e.g. checkpoints/8000
    #[arg(long)]
    pub init_from_ckpt: Option<String>,

    /// Also restore optimizer state and step count from the checkpoint
    #[arg(long)]
    pub load_optimizer: bool,

    /// Vocabulary file, one token per line
    #[arg(long, default_value = "datasets/vocab.txt")]
    pub vocab_file: String,

    /// Tab-separated training dialogues
    #[arg(long, default_value = "datasets/train.txt")]
    pub train_data_path: String,

    /// Tab-separated validation dialogues
    #[arg(long, default_value = "datasets/valid.txt")]
    pub valid_data_path: String,

    /// Maximum number of tokens in one batch
    #[arg(long, default_value_t = 8192)]
    pub batch_size: usize,

    /// Number of samples sorted by length together
    #[arg(long, default_value_t = 65536)]
    pub sort_pool_size: usize,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Peak learning rate, reached after the warmup
    #[arg(long, default_value_t = 1e-5)]
    pub lr: f64,

    /// AdamW weight decay
    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    /// Linear warmup steps of the Noam schedule
    #[arg(long, default_value_t = 4000)]
    pub warmup_steps: usize,

    /// Global gradient norm bound; 0 disables clipping
    #[arg(long, default_value_t = 0.1)]
    pub max_grad_norm: f64,

    /// Steps between progress lines; 0 disables them
    #[arg(long, default_value_t = 500)]
    pub logging_steps: usize,

    /// Steps between evaluation + checkpoint; 0 disables them
    #[arg(long, default_value_t = 8000)]
    pub save_steps: usize,

    #[command(flatten)]
    pub model: ModelArgs,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            n_gpus:          a.n_gpus,
            seed:            a.seed,
            save_dir:        a.save_dir,
            init_from_ckpt:  a.init_from_ckpt,
            load_optimizer:  a.load_optimizer,
            vocab_file:      a.vocab_file,
            train_data_path: a.train_data_path,
            valid_data_path: a.valid_data_path,
            batch_size:      a.batch_size,
            sort_pool_size:  a.sort_pool_size,
            epochs:          a.epochs,
            lr:              a.lr,
            weight_decay:    a.weight_decay,
            warmup_steps:    a.warmup_steps,
            max_grad_norm:   a.max_grad_norm,
            logging_steps:   a.logging_steps,
            save_steps:      a.save_steps,
            model:           a.model.into(),
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Checkpoint prefix; {checkpoint}.params is loaded
    #[arg(long)]
    pub checkpoint: String,

    /// Vocabulary file used for training
    #[arg(long, default_value = "datasets/vocab.txt")]
    pub vocab_file: String,

    /// Tab-separated validation dialogues
    #[arg(long, default_value = "datasets/valid.txt")]
    pub valid_data_path: String,

    /// Maximum number of tokens in one batch
    #[arg(long, default_value_t = 8192)]
    pub batch_size: usize,

    /// Number of samples sorted by length together
    #[arg(long, default_value_t = 65536)]
    pub sort_pool_size: usize,

    /// 0 evaluates on the CPU, otherwise on the default GPU
    #[arg(long, default_value_t = 1)]
    pub n_gpus: usize,

    #[command(flatten)]
    pub model: ModelArgs,
}

impl From<EvaluateArgs> for EvalConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvalConfig {
            checkpoint:      a.checkpoint,
            vocab_file:      a.vocab_file,
            valid_data_path: a.valid_data_path,
            batch_size:      a.batch_size,
            sort_pool_size:  a.sort_pool_size,
            n_gpus:          a.n_gpus,
            model:           a.model.into(),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["dialogue-finetune", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(TrainConfig::from(args), TrainConfig::default());
    }

    #[test]
    fn test_train_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "dialogue-finetune", "train",
            "--n-gpus", "0",
            "--activation", "relu",
            "--normalize-before", "false",
            "--init-from-ckpt", "checkpoints/8000",
            "--load-optimizer",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg = TrainConfig::from(args);
        assert_eq!(cfg.n_gpus, 0);
        assert_eq!(cfg.model.activation, Activation::Relu);
        assert!(!cfg.model.normalize_before);
        assert_eq!(cfg.init_from_ckpt.as_deref(), Some("checkpoints/8000"));
        assert!(cfg.load_optimizer);
    }

    #[test]
    fn test_evaluate_requires_checkpoint() {
        assert!(Cli::try_parse_from(["dialogue-finetune", "evaluate"]).is_err());
        let cli = Cli::try_parse_from(["dialogue-finetune", "evaluate", "--checkpoint", "ck/1"])
            .unwrap();
        let Commands::Evaluate(args) = cli.command else { panic!("expected evaluate") };
        assert_eq!(EvalConfig::from(args).checkpoint, "ck/1");
    }
}
