// ============================================================
// Layer 3 — Training Metrics
// ============================================================
// Metric records produced by the training and evaluation
// loops. Perplexity is always derived from the reported loss
// so the two can never disagree:
//
//   perplexity = exp(mean cross-entropy loss)

use serde::{Deserialize, Serialize};

/// exp(loss) — the language-model perplexity for a mean loss
pub fn perplexity(loss: f64) -> f64 {
    loss.exp()
}

/// One training log line, emitted every `logging_steps` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Global step index (1-based)
    pub step: usize,

    /// Mean cross-entropy of the batch that completed this step
    pub loss: f64,

    /// exp(loss)
    pub perplexity: f64,

    /// Learning rate the schedule will use for the next step
    pub learning_rate: f64,

    /// Average wall-clock seconds per step since the last log
    pub secs_per_step: f64,
}

impl StepMetrics {
    pub fn new(step: usize, loss: f64, learning_rate: f64, secs_per_step: f64) -> Self {
        Self {
            step,
            loss,
            perplexity: perplexity(loss),
            learning_rate,
            secs_per_step,
        }
    }
}

/// Summary of one full pass over the validation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    /// Summed loss divided by the number of target tokens
    pub mean_loss: f64,

    /// exp(mean_loss)
    pub perplexity: f64,

    /// Average wall-clock seconds per validation batch
    pub secs_per_step: f64,

    /// Number of validation batches consumed
    pub steps: usize,

    /// Number of target tokens scored
    pub tokens: usize,
}

impl EvalSummary {
    pub fn new(mean_loss: f64, secs_per_step: f64, steps: usize, tokens: usize) -> Self {
        Self {
            mean_loss,
            perplexity: perplexity(mean_loss),
            secs_per_step,
            steps,
            tokens,
        }
    }

    /// Returns true if this evaluation beat the previous best loss
    pub fn is_improvement(&self, best_loss: f64) -> bool {
        self.mean_loss < best_loss
    }
}
