// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from raw dialogue files to device-ready batches:
//
//   dialogue .txt file
//       │
//       ▼
//   DialogueFileLoader → parses context turns and response
//       │
//       ▼
//   Vocabulary         → token ids, special ids
//       │
//       ▼
//   DialogueDataset    → encoded samples (Burn Dataset trait)
//       │
//       ▼
//   BatchPlanner       → token-budget batches, sharded per worker
//       │
//       ▼
//   DialogueBatcher    → six padded tensors (Burn Batcher trait)
//       │
//       ▼
//   DialogueLoader     → BatchSource consumed by the loops
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads tab-separated dialogue files
pub mod loader;

/// Vocabulary file → tokenizer and special ids
pub mod vocab;

/// Sample encoding and the in-memory dataset
pub mod dataset;

/// Sort-pool batching under a token budget, sharding
pub mod sampler;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Epoch batch streams
pub mod stream;
