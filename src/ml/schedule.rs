// ============================================================
// Layer 5 — Noam Learning-Rate Schedule
// ============================================================
// Linear warmup followed by inverse-square-root decay:
//
//   lr(step) = base^-0.5 · min(step^-0.5, step · warmup^-1.5)
//   base     = 1 / (warmup · lr²)
//
// so base^-0.5 = lr · √warmup and the peak, reached exactly at
// step == warmup, equals the configured lr. step^-0.5 is taken
// as 1 at step 0, which makes the very first update use lr 0.
//
// The schedule owns its step counter; the trainer advances it
// once per optimizer step and the checkpoint stores it in the
// optimizer record.
//
// Reference: Vaswani et al. (2017) §5.3

#[derive(Debug, Clone, PartialEq)]
pub struct NoamSchedule {
    base:         f64,
    warmup_steps: usize,
    step:         usize,
}

impl NoamSchedule {
    pub fn new(learning_rate: f64, warmup_steps: usize) -> Self {
        let warmup = warmup_steps.max(1);
        Self {
            base:         1.0 / (warmup as f64 * learning_rate * learning_rate),
            warmup_steps: warmup,
            step:         0,
        }
    }

    /// Learning rate at the current step.
    pub fn lr(&self) -> f64 {
        self.lr_at(self.step)
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        let decay  = if step == 0 { 1.0 } else { (step as f64).powf(-0.5) };
        let warmup = step as f64 * (self.warmup_steps as f64).powf(-1.5);
        self.base.powf(-0.5) * decay.min(warmup)
    }

    /// Advance by one optimizer step.
    pub fn step(&mut self) {
        self.step += 1;
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    /// Resume from a checkpointed step.
    pub fn restore(&mut self, step: usize) {
        self.step = step;
    }
}
