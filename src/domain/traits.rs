// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer programs against these traits so the
// concrete implementations can be swapped:
//   - DialogueFileLoader implements DialogueSource
//   - ConsoleObserver and test recorders implement TrainObserver
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use std::path::Path;

use crate::domain::dialogue::Dialogue;
use crate::domain::metrics::{EvalSummary, StepMetrics};

// ─── DialogueSource ───────────────────────────────────────────────────────────
/// Any component that can produce dialogues.
pub trait DialogueSource {
    /// Load every dialogue available from this source.
    fn load_all(&self) -> Result<Vec<Dialogue>>;
}

// ─── TrainObserver ────────────────────────────────────────────────────────────
/// Receives the side-effecting reports of the training loop.
///
/// The loop only calls an observer on the coordinating worker
/// (rank 0), so implementations may write files freely.
pub trait TrainObserver {
    /// A new epoch is starting. `epoch` is 1-based.
    fn on_epoch_start(&mut self, epoch: usize, total_epochs: usize) -> Result<()>;

    /// A training log interval elapsed.
    fn on_step(&mut self, metrics: &StepMetrics) -> Result<()>;

    /// A cadence-triggered evaluation is about to run.
    fn on_evaluation_start(&mut self, _step: usize) -> Result<()> {
        Ok(())
    }

    /// A cadence-triggered evaluation finished.
    fn on_evaluation(&mut self, step: usize, summary: &EvalSummary) -> Result<()>;

    /// A checkpoint was written; `prefix` is `{save_dir}/{name}`.
    fn on_checkpoint(&mut self, step: usize, prefix: &Path) -> Result<()>;
}
