// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a saved checkpoint on a validation corpus:
//
//   Step 1: Validate the configuration
//   Step 2: Load the vocabulary and the validation set
//   Step 3: Rebuild the model and load {checkpoint}.params
//   Step 4: One evaluation pass → loss and perplexity
//
// The model flags must describe the architecture the
// checkpoint was trained with.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::application::config::{positive, ConfigError, ModelSettings};
use crate::application::train_use_case::load_dataset;
use crate::data::vocab::Vocabulary;
use crate::domain::metrics::EvalSummary;
use crate::ml::evaluator::run_evaluation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Checkpoint prefix; `{checkpoint}.params` is read
    pub checkpoint:      String,
    pub vocab_file:      String,
    pub valid_data_path: String,
    pub batch_size:      usize,
    pub sort_pool_size:  usize,
    /// 0 = CPU, otherwise the default GPU
    pub n_gpus:          usize,
    #[serde(flatten)]
    pub model:           ModelSettings,
}

impl EvalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        positive("batch_size", self.batch_size)?;
        positive("sort_pool_size", self.sort_pool_size)
    }
}

pub struct EvaluateUseCase {
    config: EvalConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvalSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        let vocab = Vocabulary::from_file(&cfg.vocab_file)?;
        let valid = load_dataset(&cfg.valid_data_path, &vocab, cfg.model.max_seq_len)?;

        run_evaluation(cfg, valid, vocab.size(), vocab.pad_id())
    }
}
