// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing the core concepts
// of dialogue fine-tuning: a dialogue, the metrics a run
// reports, and the seams other layers implement.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A multi-turn context paired with its response
pub mod dialogue;

// Step and evaluation metrics, perplexity
pub mod metrics;

// Core abstractions (traits) that other layers implement
pub mod traits;
