// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem or the console:
//
//   checkpoint.rs — {name}.params / {name}.opt checkpoint
//                   pairs written with Burn's named MessagePack
//                   recorder, plus the run config as JSON.
//
//   metrics.rs    — CSV log of step and evaluation metrics.
//
//   observer.rs   — TrainObserver that prints progress lines
//                   and forwards them to the CSV log.
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model and optimizer checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Console + CSV reporting for the training loop
pub mod observer;
