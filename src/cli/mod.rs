// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — fine-tunes the model, evaluating and
//                   checkpointing every --save-steps steps
//   2. `evaluate` — loads a checkpoint and reports validation
//                   loss and perplexity
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

/// The main CLI struct — clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "dialogue-finetune",
    version,
    about = "Fine-tune a unified-transformer dialogue model and report validation perplexity."
)]
pub struct Cli {
    /// The subcommand to run (train or evaluate)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

/// Handles the `train` subcommand.
fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};

    tracing::info!("Training on '{}'", args.train_data_path);
    let config: TrainConfig = args.into();
    tracing::debug!("{:#?}", config);

    TrainUseCase::new(config).execute()?;
    println!("Training complete. Checkpoints are in the save directory.");
    Ok(())
}

/// Handles the `evaluate` subcommand.
fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    tracing::info!("Evaluating checkpoint '{}'", args.checkpoint);
    let summary = EvaluateUseCase::new(args.into()).execute()?;
    tracing::info!("Scored {} tokens in {} batches", summary.tokens, summary.steps);
    Ok(())
}
