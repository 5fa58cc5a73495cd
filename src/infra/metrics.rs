// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends training and evaluation metrics to a CSV file so a
// run can be plotted afterwards.
//
// Both kinds of row share one file; the `kind` column tells
// them apart and columns that do not apply are left empty:
//
//   kind,step,loss,perplexity,learning_rate,secs_per_step,tokens
//   train,500,5.812300,334.530000,0.0000125,0.412,
//   eval,8000,4.102200,60.480000,,0.095,183204
//
// How to read the metrics:
//   - train loss should fall steadily once warmup is over
//   - eval perplexity should track train perplexity; a
//     widening gap means the model is overfitting
//
// Output file: {save_dir}/metrics.csv
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::metrics::{EvalSummary, StepMetrics};

const HEADER: &str = "kind,step,loss,perplexity,learning_rate,secs_per_step,tokens";

/// Logs step and evaluation metrics to a CSV file.
pub struct MetricsLogger {
    /// Full path to the CSV file
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the header if the file doesn't exist yet, so
    /// resumed runs keep appending to the same log.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log_step(&self, m: &StepMetrics) -> Result<()> {
        self.append(format_args!(
            "train,{},{:.6},{:.6},{:.9},{:.3},",
            m.step, m.loss, m.perplexity, m.learning_rate, m.secs_per_step,
        ))
    }

    pub fn log_eval(&self, step: usize, s: &EvalSummary) -> Result<()> {
        self.append(format_args!(
            "eval,{},{:.6},{:.6},,{:.3},{}",
            step, s.mean_loss, s.perplexity, s.secs_per_step, s.tokens,
        ))
    }

    fn append(&self, row: std::fmt::Arguments<'_>) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{row}")?;
        Ok(())
    }

    #[cfg(test)]
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
