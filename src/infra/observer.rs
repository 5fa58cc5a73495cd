// ============================================================
// Layer 6 — Console Observer
// ============================================================
// Production TrainObserver: prints the human-readable progress
// lines and mirrors every metric into the CSV log.
//
//   Epoch 1/3
//   step 500 - loss: 5.8123 - ppl: 334.5300 - lr: 0.0000125 - 0.412s/step
//   loss: 4.1022 - ppl: 60.4800 - 0.095s/step

use anyhow::Result;
use std::path::Path;

use crate::domain::metrics::{EvalSummary, StepMetrics};
use crate::domain::traits::TrainObserver;
use crate::infra::metrics::MetricsLogger;

pub struct ConsoleObserver {
    metrics:   Option<MetricsLogger>,
    best_loss: f64,
}

impl ConsoleObserver {
    pub fn new(metrics: Option<MetricsLogger>) -> Self {
        Self { metrics, best_loss: f64::INFINITY }
    }
}

pub fn step_line(m: &StepMetrics) -> String {
    format!(
        "step {} - loss: {:.4} - ppl: {:.4} - lr: {:.7} - {:.3}s/step",
        m.step, m.loss, m.perplexity, m.learning_rate, m.secs_per_step,
    )
}

pub fn eval_line(s: &EvalSummary) -> String {
    format!(
        "loss: {:.4} - ppl: {:.4} - {:.3}s/step",
        s.mean_loss, s.perplexity, s.secs_per_step,
    )
}

impl TrainObserver for ConsoleObserver {
    fn on_epoch_start(&mut self, epoch: usize, total_epochs: usize) -> Result<()> {
        println!("\nEpoch {epoch}/{total_epochs}");
        Ok(())
    }

    fn on_step(&mut self, metrics: &StepMetrics) -> Result<()> {
        println!("{}", step_line(metrics));
        match &self.metrics {
            Some(log) => log.log_step(metrics),
            None      => Ok(()),
        }
    }

    fn on_evaluation_start(&mut self, _step: usize) -> Result<()> {
        println!("\nEval begin...");
        Ok(())
    }

    fn on_evaluation(&mut self, step: usize, summary: &EvalSummary) -> Result<()> {
        println!("{}\n", eval_line(summary));
        if summary.is_improvement(self.best_loss) {
            tracing::info!("New best validation loss {:.4} at step {}", summary.mean_loss, step);
            self.best_loss = summary.mean_loss;
        }
        match &self.metrics {
            Some(log) => log.log_eval(step, summary),
            None      => Ok(()),
        }
    }

    fn on_checkpoint(&mut self, step: usize, prefix: &Path) -> Result<()> {
        tracing::info!("Saved checkpoint at step {} to '{}'", step, prefix.display());
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_line_format() {
        let m = StepMetrics::new(500, 0.0, 0.0000125, 0.4123);
        assert_eq!(
            step_line(&m),
            "step 500 - loss: 0.0000 - ppl: 1.0000 - lr: 0.0000125 - 0.412s/step"
        );
    }

    #[test]
    fn test_eval_line_format() {
        let s = EvalSummary::new(1.0, 0.0954, 2, 10);
        assert_eq!(eval_line(&s), "loss: 1.0000 - ppl: 2.7183 - 0.095s/step");
    }

    #[test]
    fn test_console_observer_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let log = MetricsLogger::new(dir.path()).unwrap();
        let csv = log.csv_path().to_path_buf();

        let mut observer = ConsoleObserver::new(Some(log));
        observer.on_epoch_start(1, 1).unwrap();
        observer.on_step(&StepMetrics::new(1, 1.0, 1e-3, 0.1)).unwrap();
        observer.on_evaluation(1, &EvalSummary::new(1.0, 0.1, 1, 5)).unwrap();

        let rows = std::fs::read_to_string(csv).unwrap().lines().count();
        assert_eq!(rows, 3);
    }
}
