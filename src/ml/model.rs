// ============================================================
// Layer 5 — Unified Transformer
// ============================================================
// One transformer stack serves both as the context encoder and
// as the response decoder. The generation mask decides who may
// attend to whom (see data::batcher), so a single forward pass
// scores every response token of every sample in the batch.
//
//   token_ids ─► word emb ─┐
//   type_ids  ─► type emb ─┼─ sum ─► dropout ─► N × EncoderBlock ─► [B, S, D]
//   pos_ids   ─► pos emb  ─┘                       ▲
//                                                  │ generation_mask
//
//   [B, S, D] ─► flatten [B*S, D] ─► select(tgt_pos) ─► [T, D]
//             ─► linear ─► activation ─► layer norm
//             ─► × word_embeddingᵀ + bias ─► logits [T, vocab]
//
// The output projection shares its weights with the word
// embedding table.
//
// Reference: Bao et al. (2020) PLATO-2
//            Burn Book §3 (Building Blocks)

use burn::{
    module::{Ignored, Param},
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::data::batcher::DialogueBatch;

const EMBEDDING_INIT: Initializer = Initializer::Normal { mean: 0.0, std: 0.02 };

// ─── Activation ───────────────────────────────────────────────────────────────
/// Hidden activation of the feed-forward and output-transform layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Gelu,
    Relu,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Gelu => activation::gelu(x),
            Self::Relu => activation::relu(x),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gelu" => Ok(Self::Gelu),
            "relu" => Ok(Self::Relu),
            other  => Err(format!("unknown activation '{other}' (expected gelu or relu)")),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gelu => write!(f, "gelu"),
            Self::Relu => write!(f, "relu"),
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct UnifiedTransformerConfig {
    pub vocab_size:  usize,
    pub type_size:   usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    #[config(default = 0.1)]
    pub dropout:     f64,
    #[config(default = "Activation::Gelu")]
    pub activation:  Activation,
    /// Pre-norm (true) or post-norm (false) residual blocks
    #[config(default = true)]
    pub normalize_before: bool,
}

impl UnifiedTransformerConfig {
    /// Feed-forward inner width
    pub fn d_ff(&self) -> usize {
        4 * self.d_model
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UnifiedTransformer<B> {
        let word_embedding = EmbeddingConfig::new(self.vocab_size, self.d_model)
            .with_initializer(EMBEDDING_INIT)
            .init(device);
        let type_embedding = EmbeddingConfig::new(self.type_size, self.d_model)
            .with_initializer(EMBEDDING_INIT)
            .init(device);
        let pos_embedding  = EmbeddingConfig::new(self.max_seq_len, self.d_model)
            .with_initializer(EMBEDDING_INIT)
            .init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        // Pre-norm stacks leave the residual stream unnormalised.
        let final_norm = self
            .normalize_before
            .then(|| LayerNormConfig::new(self.d_model).init(device));

        let lm_transform = LinearConfig::new(self.d_model, self.d_model).init(device);
        let lm_norm      = LayerNormConfig::new(self.d_model).init(device);
        let lm_bias      = Param::from_tensor(Tensor::zeros([self.vocab_size], device));
        let dropout      = DropoutConfig::new(self.dropout).init();

        UnifiedTransformer {
            word_embedding, type_embedding, pos_embedding,
            layers, final_norm,
            lm_transform, lm_norm, lm_bias,
            dropout,
            activation:  Ignored(self.activation),
            max_seq_len: self.max_seq_len,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff()).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff(), self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock {
            self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout,
            activation:       Ignored(self.activation),
            normalize_before: self.normalize_before,
        }
    }
}

// ─── EncoderBlock ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:        MultiHeadAttention<B>,
    pub ffn_linear1:      Linear<B>,
    pub ffn_linear2:      Linear<B>,
    pub norm1:            LayerNorm<B>,
    pub norm2:            LayerNorm<B>,
    pub dropout:          Dropout,
    pub activation:       Ignored<Activation>,
    pub normalize_before: bool,
}

impl<B: Backend> EncoderBlock<B> {
    /// `mask`: [batch, seq, seq], true where attention is forbidden.
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 3, Bool>) -> Tensor<B, 3> {
        if self.normalize_before {
            let attn = self.attend(self.norm1.forward(x.clone()), mask);
            let x    = x + self.dropout.forward(attn);
            let ffn  = self.feed_forward(self.norm2.forward(x.clone()));
            x + self.dropout.forward(ffn)
        } else {
            let attn = self.attend(x.clone(), mask);
            let x    = self.norm1.forward(x + self.dropout.forward(attn));
            let ffn  = self.feed_forward(x.clone());
            self.norm2.forward(x + self.dropout.forward(ffn))
        }
    }

    fn attend(&self, x: Tensor<B, 3>, mask: Tensor<B, 3, Bool>) -> Tensor<B, 3> {
        self.self_attn
            .forward(MhaInput::self_attn(x).mask_attn(mask))
            .context
    }

    fn feed_forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = self.activation.0.apply(self.ffn_linear1.forward(x));
        self.ffn_linear2.forward(self.dropout.forward(hidden))
    }
}

// ─── UnifiedTransformer ───────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct UnifiedTransformer<B: Backend> {
    pub word_embedding: Embedding<B>,
    pub type_embedding: Embedding<B>,
    pub pos_embedding:  Embedding<B>,
    pub layers:         Vec<EncoderBlock<B>>,
    pub final_norm:     Option<LayerNorm<B>>,
    pub lm_transform:   Linear<B>,
    pub lm_norm:        LayerNorm<B>,
    pub lm_bias:        Param<Tensor<B, 1>>,
    pub dropout:        Dropout,
    pub activation:     Ignored<Activation>,
    pub max_seq_len:    usize,
}

impl<B: Backend> UnifiedTransformer<B> {
    /// Logits over the vocabulary for every target position.
    ///
    /// token_ids, type_ids, pos_ids: [batch, seq]
    /// generation_mask:              [batch, seq, seq], 1 = may attend
    /// tgt_pos:                      [T], flattened `b * seq + position`
    ///
    /// Returns [T, vocab_size].
    pub fn forward(
        &self,
        token_ids:       Tensor<B, 2, Int>,
        type_ids:        Tensor<B, 2, Int>,
        pos_ids:         Tensor<B, 2, Int>,
        generation_mask: Tensor<B, 3, Int>,
        tgt_pos:         Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let [batch_size, seq_len] = token_ids.dims();

        let embeddings = self.word_embedding.forward(token_ids)
            + self.type_embedding.forward(type_ids)
            + self.pos_embedding.forward(pos_ids);
        let mut x = self.dropout.forward(embeddings);

        let mask = generation_mask.equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, mask.clone());
        }
        if let Some(norm) = &self.final_norm {
            x = norm.forward(x);
        }

        let [_, _, d_model] = x.dims();
        let hidden = x
            .reshape([batch_size * seq_len, d_model])
            .select(0, tgt_pos);
        let hidden = self.lm_transform.forward(hidden);
        let hidden = self.lm_norm.forward(self.activation.0.apply(hidden));

        let vocab_weights = self.word_embedding.weight.val();
        hidden.matmul(vocab_weights.transpose()) + self.lm_bias.val().unsqueeze::<2>()
    }

    /// Forward pass over a whole batch.
    pub fn forward_batch(&self, batch: &DialogueBatch<B>) -> Tensor<B, 2> {
        self.forward(
            batch.token_ids.clone(),
            batch.type_ids.clone(),
            batch.pos_ids.clone(),
            batch.generation_mask.clone(),
            batch.tgt_pos.clone(),
        )
    }

    /// Mean cross-entropy over the batch's target tokens (training loss).
    pub fn forward_loss(&self, batch: &DialogueBatch<B>) -> Tensor<B, 1> {
        let logits = self.forward_batch(batch);
        let ce = CrossEntropyLossConfig::new().init(&logits.device());
        ce.forward(logits, batch.tgt_label.clone())
    }

    /// Summed cross-entropy over the batch's target tokens (evaluation loss).
    pub fn sum_loss(&self, batch: &DialogueBatch<B>) -> Tensor<B, 1> {
        let logits = self.forward_batch(batch);
        sum_cross_entropy(logits, batch.tgt_label.clone())
    }
}

/// −Σ log softmax(logits)[label] over the rows of `logits`.
pub fn sum_cross_entropy<B: Backend>(
    logits:  Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    activation::log_softmax(logits, 1)
        .gather(1, targets.unsqueeze_dim::<2>(1))
        .sum()
        .neg()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tiny_batch, tiny_model_config};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_logits_have_one_row_per_target() {
        let device = Default::default();
        let model  = tiny_model_config().init::<TestBackend>(&device);
        let batch  = tiny_batch::<TestBackend>(&device);

        let logits = model.forward_batch(&batch);
        assert_eq!(logits.dims(), [batch.target_count(), tiny_model_config().vocab_size]);
    }

    #[test]
    fn test_sum_loss_is_mean_loss_times_token_count() {
        let device = Default::default();
        let model  = tiny_model_config().with_dropout(0.0).init::<TestBackend>(&device);
        let batch  = tiny_batch::<TestBackend>(&device);

        let mean: f64 = model.forward_loss(&batch).into_scalar().elem();
        let sum:  f64 = model.sum_loss(&batch).into_scalar().elem();
        let expected  = mean * batch.target_count() as f64;
        assert!((sum - expected).abs() < 1e-3 * expected.abs().max(1.0));
    }

    #[test]
    fn test_sum_cross_entropy_of_uniform_logits() {
        let device  = Default::default();
        let logits  = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 3], &device);
        let loss: f64 = sum_cross_entropy(logits, targets).into_scalar().elem();
        assert!((loss - 3.0 * 4f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_post_norm_variant_runs() {
        let device = Default::default();
        let model  = tiny_model_config()
            .with_normalize_before(false)
            .with_activation(Activation::Relu)
            .init::<TestBackend>(&device);
        assert!(model.final_norm.is_none());
        let batch  = tiny_batch::<TestBackend>(&device);
        let logits = model.forward_batch(&batch);
        assert_eq!(logits.dims()[0], batch.target_count());
    }

    #[test]
    fn test_activation_parses_case_insensitively() {
        assert_eq!("GELU".parse::<Activation>(), Ok(Activation::Gelu));
        assert_eq!("relu".parse::<Activation>(), Ok(Activation::Relu));
        assert!("tanh".parse::<Activation>().is_err());
    }
}
