// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full fine-tuning pipeline in order:
//
//   Step 1: Validate the configuration
//   Step 2: Load the vocabulary                (Layer 4 - data)
//   Step 3: Load and encode train / valid sets (Layer 4 - data)
//   Step 4: Save config                        (Layer 6 - infra)
//   Step 5: Launch the training workers        (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::application::config::{non_negative, positive, ConfigError, ModelSettings};
use crate::data::{dataset::DialogueDataset, loader::DialogueFileLoader, vocab::Vocabulary};
use crate::domain::traits::DialogueSource;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::UnifiedTransformerConfig;
use crate::ml::trainer::{run_training, TrainingData};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Serialisable so it can be saved next to the checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// 0 = CPU, 1 = one GPU, n = one replica per GPU
    pub n_gpus:          usize,
    pub seed:            u64,

    pub save_dir:        String,
    /// Checkpoint prefix (`{dir}/{name}`) to start from
    pub init_from_ckpt:  Option<String>,
    /// Also restore optimizer state and schedule step
    pub load_optimizer:  bool,
    pub vocab_file:      String,
    pub train_data_path: String,
    pub valid_data_path: String,

    /// Token budget per batch (max length × samples)
    pub batch_size:      usize,
    pub sort_pool_size:  usize,

    pub epochs:          usize,
    pub lr:              f64,
    pub weight_decay:    f64,
    pub warmup_steps:    usize,
    pub max_grad_norm:   f64,

    pub logging_steps:   usize,
    pub save_steps:      usize,

    #[serde(flatten)]
    pub model:           ModelSettings,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_gpus:          1,
            seed:            2021,
            save_dir:        "checkpoints".to_string(),
            init_from_ckpt:  None,
            load_optimizer:  false,
            vocab_file:      "datasets/vocab.txt".to_string(),
            train_data_path: "datasets/train.txt".to_string(),
            valid_data_path: "datasets/valid.txt".to_string(),
            batch_size:      8192,
            sort_pool_size:  65536,
            epochs:          10,
            lr:              1e-5,
            weight_decay:    0.01,
            warmup_steps:    4000,
            max_grad_norm:   0.1,
            logging_steps:   500,
            save_steps:      8000,
            model:           ModelSettings::default(),
        }
    }
}

impl TrainConfig {
    /// Number of data-parallel replicas
    pub fn world_size(&self) -> usize {
        self.n_gpus.max(1)
    }

    pub fn model_config(&self, vocab_size: usize) -> UnifiedTransformerConfig {
        self.model.model_config(vocab_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        positive("batch_size", self.batch_size)?;
        positive("sort_pool_size", self.sort_pool_size)?;
        positive("warmup_steps", self.warmup_steps)?;
        non_negative("weight_decay", self.weight_decay)?;
        non_negative("max_grad_norm", self.max_grad_norm)?;
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ConfigError::Zero("lr"));
        }
        if self.load_optimizer && self.init_from_ckpt.is_none() {
            return Err(ConfigError::OptimizerWithoutCheckpoint);
        }
        Ok(())
    }
}

/// Read a dialogue file and encode it into a shared dataset.
pub(crate) fn load_dataset(
    path:        &str,
    vocab:       &Vocabulary,
    max_seq_len: usize,
) -> Result<Arc<DialogueDataset>> {
    let dialogues = DialogueFileLoader::new(path).load_all()?;
    let dataset   = DialogueDataset::from_dialogues(&dialogues, vocab, max_seq_len)?;
    Ok(Arc::new(dataset))
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Vocabulary ────────────────────────────────────────────────
        let vocab = Vocabulary::from_file(&cfg.vocab_file)?;

        // ── Step 3: Datasets ──────────────────────────────────────────────────
        let train = load_dataset(&cfg.train_data_path, &vocab, cfg.model.max_seq_len)?;
        let valid = load_dataset(&cfg.valid_data_path, &vocab, cfg.model.max_seq_len)?;
        tracing::info!(
            "Datasets: {} train, {} validation samples",
            train.sample_count(),
            valid.sample_count()
        );

        // ── Step 4: Save config next to the checkpoints ───────────────────────
        let checkpoints = CheckpointManager::new(&cfg.save_dir)?;
        checkpoints.save_config(cfg)?;

        // ── Step 5: Run training (Layer 5) ────────────────────────────────────
        let data = TrainingData {
            train,
            valid,
            vocab_size: vocab.size(),
            pad_id:     vocab.pad_id(),
        };
        run_training(cfg, &data, &checkpoints)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::evaluate_use_case::{EvalConfig, EvaluateUseCase};
    use crate::testing::write_corpus;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(TrainConfig::default().validate(), Ok(()));
        assert_eq!(TrainConfig::default().world_size(), 1);
    }

    #[test]
    fn test_rejects_optimizer_without_checkpoint() {
        let cfg = TrainConfig { load_optimizer: true, ..TrainConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::OptimizerWithoutCheckpoint));
    }

    #[test]
    fn test_rejects_zero_budgets() {
        let cfg = TrainConfig { batch_size: 0, ..TrainConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("batch_size")));
        let cfg = TrainConfig { lr: 0.0, ..TrainConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("lr")));
    }

    #[test]
    fn test_config_json_is_flat() {
        let json = serde_json::to_value(TrainConfig::default()).unwrap();
        assert_eq!(json["d_model"], 768);
        assert_eq!(json["activation"], "gelu");
        assert!(json.get("model").is_none());
    }

    #[test]
    fn test_train_then_evaluate_end_to_end() {
        let dir    = tempfile::tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let save   = dir.path().join("save");

        let cfg = TrainConfig {
            n_gpus:          0,
            save_dir:        save.to_string_lossy().into_owned(),
            vocab_file:      corpus.vocab.clone(),
            train_data_path: corpus.train.clone(),
            valid_data_path: corpus.valid.clone(),
            batch_size:      64,
            sort_pool_size:  16,
            epochs:          1,
            lr:              1e-3,
            warmup_steps:    2,
            logging_steps:   1,
            save_steps:      2,
            model:           corpus.model.clone(),
            ..TrainConfig::default()
        };
        TrainUseCase::new(cfg.clone()).execute().unwrap();

        assert!(save.join("train_config.json").exists());
        assert!(save.join("metrics.csv").exists());
        assert!(save.join("2.params").exists());
        assert!(save.join("2.opt").exists());
        assert_eq!(CheckpointManager::new(&save).unwrap().load_config().unwrap(), cfg);

        let summary = EvaluateUseCase::new(EvalConfig {
            checkpoint:      save.join("2").to_string_lossy().into_owned(),
            vocab_file:      corpus.vocab,
            valid_data_path: corpus.valid,
            batch_size:      64,
            sort_pool_size:  16,
            n_gpus:          0,
            model:           corpus.model,
        })
        .execute()
        .unwrap();
        assert!(summary.tokens > 0);
        assert!(summary.mean_loss.is_finite());
    }

    #[test]
    fn test_resume_restores_optimizer_state() {
        let dir    = tempfile::tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let first  = dir.path().join("first");
        let second = dir.path().join("second");

        let base = TrainConfig {
            n_gpus:          0,
            vocab_file:      corpus.vocab.clone(),
            train_data_path: corpus.train.clone(),
            valid_data_path: corpus.valid.clone(),
            batch_size:      64,
            sort_pool_size:  16,
            epochs:          1,
            lr:              1e-3,
            warmup_steps:    2,
            logging_steps:   0,
            save_steps:      2,
            model:           corpus.model.clone(),
            ..TrainConfig::default()
        };
        TrainUseCase::new(TrainConfig {
            save_dir: first.to_string_lossy().into_owned(),
            ..base.clone()
        })
        .execute()
        .unwrap();

        // The resumed run continues at step 2, so its first save is at step 4.
        TrainUseCase::new(TrainConfig {
            save_dir:       second.to_string_lossy().into_owned(),
            init_from_ckpt: Some(first.join("2").to_string_lossy().into_owned()),
            load_optimizer: true,
            ..base
        })
        .execute()
        .unwrap();
        assert!(second.join("4.params").exists());
        assert!(!second.join("2.params").exists());
    }
}
