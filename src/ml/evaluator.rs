// ============================================================
// Layer 5 — Evaluation Loop
// ============================================================
// One gradient-free pass over the validation stream.
//
// Losses are summed per token and divided by the total token
// count at the end, so long and short batches weigh in by the
// number of targets they score:
//
//   mean_loss  = Σ_batches sum_ce(batch) / Σ_batches tokens(batch)
//   perplexity = exp(mean_loss)
//
// Callers pass model.valid(): the inner-backend copy has no
// autodiff graph and no dropout, and the training model itself
// is never touched. Timing covers the whole pass, batch
// assembly included.

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    prelude::*,
};
use std::{path::Path, sync::Arc, time::Instant};
use thiserror::Error;

use crate::application::evaluate_use_case::EvalConfig;
use crate::data::{
    batcher::DialogueBatcher,
    dataset::DialogueDataset,
    sampler::BatchPlanner,
    stream::{BatchSource, DialogueLoader},
};
use crate::domain::metrics::EvalSummary;
use crate::infra::{checkpoint::load_params, observer::eval_line};
use crate::ml::model::UnifiedTransformer;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("validation stream produced no target tokens")]
    EmptyValidationStream,
}

/// Score every batch of `valid` once.
pub fn evaluate<B, V>(model: &UnifiedTransformer<B>, valid: &V) -> Result<EvalSummary>
where
    B: Backend,
    V: BatchSource<B> + ?Sized,
{
    let mut total_loss = 0.0f64;
    let mut tokens     = 0usize;
    let mut steps      = 0usize;
    let started        = Instant::now();

    for batch in valid.batches(0) {
        let loss: f64 = model.sum_loss(&batch).into_scalar().elem();
        total_loss += loss;
        tokens     += batch.target_count();
        steps      += 1;
    }

    if tokens == 0 {
        return Err(EvaluationError::EmptyValidationStream.into());
    }

    let secs_per_step = started.elapsed().as_secs_f64() / steps as f64;
    let summary = EvalSummary::new(total_loss / tokens as f64, secs_per_step, steps, tokens);
    tracing::debug!("evaluated {} batches, {} tokens", steps, tokens);
    Ok(summary)
}

// ─── Checkpoint evaluation ────────────────────────────────────────────────────
/// Load `{cfg.checkpoint}.params` on a plain backend and score `valid`.
pub fn run_evaluation(
    cfg:        &EvalConfig,
    valid:      Arc<DialogueDataset>,
    vocab_size: usize,
    pad_id:     u32,
) -> Result<EvalSummary> {
    match cfg.n_gpus {
        0 => evaluate_on::<NdArray>(cfg, valid, vocab_size, pad_id, &NdArrayDevice::Cpu),
        _ => evaluate_on::<Wgpu>(cfg, valid, vocab_size, pad_id, &WgpuDevice::DefaultDevice),
    }
}

fn evaluate_on<B: Backend>(
    cfg:        &EvalConfig,
    valid:      Arc<DialogueDataset>,
    vocab_size: usize,
    pad_id:     u32,
    device:     &B::Device,
) -> Result<EvalSummary> {
    let model = cfg.model.model_config(vocab_size).init::<B>(device);
    let model = load_params::<B, _>(Path::new(&cfg.checkpoint), model, device)?;

    let loader = DialogueLoader::new(
        valid,
        BatchPlanner::eval(cfg.batch_size, cfg.sort_pool_size),
        DialogueBatcher::<B>::new(device.clone(), pad_id),
    );
    let summary = evaluate(&model, &loader)?;
    println!("{}", eval_line(&summary));
    Ok(summary)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::DialogueBatch;
    use crate::testing::{tiny_batch, tiny_model_config};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_single_batch_mean_is_sum_over_tokens() {
        let device = Default::default();
        let model  = tiny_model_config().init::<TestBackend>(&device);
        let batch  = tiny_batch::<TestBackend>(&device);

        let sum: f64 = model.sum_loss(&batch).into_scalar().elem();
        let expected = sum / batch.target_count() as f64;

        let summary = evaluate(&model, &vec![batch.clone()]).unwrap();
        assert!((summary.mean_loss - expected).abs() < 1e-6);
        assert_eq!(summary.tokens, batch.target_count());
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.perplexity, summary.mean_loss.exp());
    }

    #[test]
    fn test_batches_are_weighted_by_tokens() {
        let device = Default::default();
        let model  = tiny_model_config().init::<TestBackend>(&device);
        let batch  = tiny_batch::<TestBackend>(&device);

        let once  = evaluate(&model, &vec![batch.clone()]).unwrap();
        let twice = evaluate(&model, &vec![batch.clone(), batch]).unwrap();
        assert!((once.mean_loss - twice.mean_loss).abs() < 1e-6);
        assert_eq!(twice.tokens, 2 * once.tokens);
    }

    #[test]
    fn test_empty_stream_is_an_error() {
        let device = Default::default();
        let model  = tiny_model_config().init::<TestBackend>(&device);
        let empty: Vec<DialogueBatch<TestBackend>> = Vec::new();

        let err = evaluate(&model, &empty).unwrap_err();
        assert_eq!(
            err.downcast_ref::<EvaluationError>(),
            Some(&EvaluationError::EmptyValidationStream)
        );
    }
}
