// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that runs tensors lives here:
//
//   model.rs     — The unified transformer
//                  • word, type and position embeddings
//                  • pre- or post-norm encoder blocks under a
//                    generation mask
//                  • output head tied to the word embeddings
//
//   schedule.rs  — Noam warmup / inverse-sqrt learning rate
//
//   clip.rs      — Global-norm gradient clipping
//
//   parallel.rs  — Launchers (in-process, one thread per
//                  device) and gradient all-reduce
//
//   evaluator.rs — No-gradient validation pass, perplexity
//
//   trainer.rs   — The training loop and worker setup
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Unified transformer dialogue model
pub mod model;

/// Noam learning-rate schedule
pub mod schedule;

/// Global-norm gradient clipping
pub mod clip;

/// Data-parallel launch and gradient synchronisation
pub mod parallel;

/// Validation loss and perplexity
pub mod evaluator;

/// Full training loop with periodic evaluation and checkpointing
pub mod trainer;
