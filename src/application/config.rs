// ============================================================
// Layer 2 — Model Settings and Config Validation
// ============================================================
// The model hyperparameters shared by the train and evaluate
// configurations, and the errors a configuration can fail
// validation with. Both configs flatten ModelSettings, so the
// saved train_config.json stays a single flat object.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::model::{Activation, UnifiedTransformerConfig};

/// Reasons a configuration is rejected before any work starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("d_model ({d_model}) must be divisible by nhead ({nhead})")]
    HeadsDoNotDivide { d_model: usize, nhead: usize },

    #[error("dropout must be in [0, 1), got {0}")]
    Dropout(f64),

    #[error("max_seq_len must be at least 4, got {0}")]
    SequenceTooShort(usize),

    #[error("type_size must be at least 2 (context and response), got {0}")]
    TooFewTypes(usize),

    #[error("min_dec_len ({min}) must not exceed max_dec_len ({max})")]
    DecodeBounds { min: usize, max: usize },

    #[error("{name} must be a finite non-negative number, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("load_optimizer requires init_from_ckpt")]
    OptimizerWithoutCheckpoint,
}

pub(crate) fn positive(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 { Err(ConfigError::Zero(name)) } else { Ok(()) }
}

pub(crate) fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

// ─── ModelSettings ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub num_layers:       usize,
    pub d_model:          usize,
    pub nhead:            usize,
    pub dropout:          f64,
    pub activation:       Activation,
    pub normalize_before: bool,
    /// Segment vocabulary size (context = 0, response = 1)
    pub type_size:        usize,
    pub max_seq_len:      usize,
    // Decoding bounds, kept so checkpoints carry a complete
    // generation configuration.
    pub min_dec_len:      usize,
    pub max_dec_len:      usize,
    pub topk:             usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            num_layers:       12,
            d_model:          768,
            nhead:            12,
            dropout:          0.1,
            activation:       Activation::Gelu,
            normalize_before: true,
            type_size:        2,
            max_seq_len:      512,
            min_dec_len:      1,
            max_dec_len:      64,
            topk:             4,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("num_layers", self.num_layers)?;
        positive("d_model", self.d_model)?;
        positive("nhead", self.nhead)?;
        positive("topk", self.topk)?;
        if self.d_model % self.nhead != 0 {
            return Err(ConfigError::HeadsDoNotDivide { d_model: self.d_model, nhead: self.nhead });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Dropout(self.dropout));
        }
        if self.max_seq_len < 4 {
            return Err(ConfigError::SequenceTooShort(self.max_seq_len));
        }
        if self.type_size < 2 {
            return Err(ConfigError::TooFewTypes(self.type_size));
        }
        if self.min_dec_len > self.max_dec_len {
            return Err(ConfigError::DecodeBounds { min: self.min_dec_len, max: self.max_dec_len });
        }
        Ok(())
    }

    /// Architecture for a vocabulary of `vocab_size` ids.
    pub fn model_config(&self, vocab_size: usize) -> UnifiedTransformerConfig {
        UnifiedTransformerConfig::new(
            vocab_size,
            self.type_size,
            self.max_seq_len,
            self.d_model,
            self.nhead,
            self.num_layers,
        )
        .with_dropout(self.dropout)
        .with_activation(self.activation)
        .with_normalize_before(self.normalize_before)
    }
}
