// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Per batch, on every replica:
//
//   forward ─► mean cross-entropy ─► backward ─► all-reduce
//           ─► clip by global norm ─► AdamW step at schedule lr
//           ─► advance schedule
//
// The gradients are consumed by the optimizer step, so every
// forward pass starts from a clean slate.
//
// Only the coordinator (rank 0) reports:
//   - every `logging_steps` steps: loss, ppl, lr, s/step
//   - every `save_steps` steps:    evaluation, then checkpoint
//
// Key Burn insight:
//   - Training runs on Autodiff<backend> for gradients
//   - model.valid() returns the model on the inner backend,
//     with dropout off, for the evaluation pass
//   - The validation batcher must also use the inner backend
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::{anyhow, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::{
    path::Path,
    sync::Arc,
    time::Instant,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::DialogueBatcher,
    dataset::DialogueDataset,
    sampler::BatchPlanner,
    stream::{BatchSource, DialogueLoader},
};
use crate::domain::{metrics::StepMetrics, traits::TrainObserver};
use crate::infra::{
    checkpoint::{decode_params, encode_params, load_checkpoint, load_params, CheckpointManager},
    metrics::MetricsLogger,
    observer::ConsoleObserver,
};
use crate::ml::{
    clip::clip_by_global_norm,
    evaluator::evaluate,
    model::UnifiedTransformer,
    parallel::{
        GradientSync, InProcessLauncher, Launcher, LocalSync, ThreadAllReduce, ThreadLauncher,
        WorkerContext,
    },
    schedule::NoamSchedule,
};

// ─── Loop state ───────────────────────────────────────────────────────────────
/// Counters threaded through the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainState {
    /// Global optimizer steps taken, including resumed ones
    pub step:    usize,
    /// Seconds spent in training steps since the last log line
    pub elapsed: f64,
}

/// Cadences and limits of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub epochs:        usize,
    pub logging_steps: usize,
    pub save_steps:    usize,
    pub max_grad_norm: f64,
}

impl From<&TrainConfig> for LoopSettings {
    fn from(cfg: &TrainConfig) -> Self {
        Self {
            epochs:        cfg.epochs,
            logging_steps: cfg.logging_steps,
            save_steps:    cfg.save_steps,
            max_grad_norm: cfg.max_grad_norm,
        }
    }
}

fn is_due(step: usize, every: usize) -> bool {
    every > 0 && step % every == 0
}

// ─── Session ──────────────────────────────────────────────────────────────────
/// Everything one replica mutates while training.
pub struct Session<B: AutodiffBackend, O> {
    pub ctx:       WorkerContext,
    pub model:     UnifiedTransformer<B>,
    pub optimizer: O,
    pub schedule:  NoamSchedule,
    pub state:     TrainState,
}

impl<B, O> Session<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<UnifiedTransformer<B>, B>,
{
    /// The global step resumes from the schedule's step.
    pub fn new(
        ctx:       WorkerContext,
        model:     UnifiedTransformer<B>,
        optimizer: O,
        schedule:  NoamSchedule,
    ) -> Self {
        let state = TrainState { step: schedule.current_step(), elapsed: 0.0 };
        Self { ctx, model, optimizer, schedule, state }
    }

    /// Run every epoch of `train`, reporting through `observer` on rank 0.
    pub fn train<G, T, V>(
        mut self,
        settings:    &LoopSettings,
        train:       &T,
        valid:       &V,
        sync:        &G,
        checkpoints: &CheckpointManager,
        observer:    &mut dyn TrainObserver,
    ) -> Result<Self>
    where
        G: GradientSync<B>,
        T: BatchSource<B> + ?Sized,
        V: BatchSource<B::InnerBackend> + ?Sized,
    {
        let coordinator = self.ctx.is_coordinator();

        for epoch in 0..settings.epochs {
            if coordinator {
                observer.on_epoch_start(epoch + 1, settings.epochs)?;
            }

            let mut batch_start = Instant::now();
            for batch in train.batches(epoch) {
                // ── Forward + backward ────────────────────────────────────────
                let loss       = self.model.forward_loss(&batch);
                let loss_value = loss.clone().into_scalar().elem::<f64>();
                let grads      = GradientsParams::from_grads(loss.backward(), &self.model);

                // ── Sync, clip, update ────────────────────────────────────────
                let mut grads = sync.all_reduce(&self.model, grads)?;
                clip_by_global_norm::<B, _>(&self.model, &mut grads, settings.max_grad_norm);
                self.model = self.optimizer.step(self.schedule.lr(), self.model, grads);
                self.schedule.step();

                self.state.step    += 1;
                self.state.elapsed += batch_start.elapsed().as_secs_f64();
                let step = self.state.step;

                if coordinator {
                    if is_due(step, settings.logging_steps) {
                        let secs_per_step = self.state.elapsed / settings.logging_steps as f64;
                        let metrics = StepMetrics::new(step, loss_value, self.schedule.lr(), secs_per_step);
                        observer.on_step(&metrics)?;
                        self.state.elapsed = 0.0;
                    }
                    if is_due(step, settings.save_steps) {
                        observer.on_evaluation_start(step)?;
                        let summary = evaluate(&self.model.valid(), valid)?;
                        observer.on_evaluation(step, &summary)?;

                        let prefix = checkpoints.save::<B, _, _>(
                            &self.model, &self.optimizer, &self.schedule, step,
                        )?;
                        observer.on_checkpoint(step, &prefix)?;
                    }
                }
                batch_start = Instant::now();
            }
        }

        Ok(self)
    }
}

// ─── Worker setup ─────────────────────────────────────────────────────────────
/// Encoded datasets plus the vocabulary facts the workers need.
pub struct TrainingData {
    pub train:      Arc<DialogueDataset>,
    pub valid:      Arc<DialogueDataset>,
    pub vocab_size: usize,
    pub pad_id:     u32,
}

/// Pick the backend from the device count and launch the replicas.
pub fn run_training(
    cfg:         &TrainConfig,
    data:        &TrainingData,
    checkpoints: &CheckpointManager,
) -> Result<()> {
    match cfg.n_gpus {
        0 => {
            tracing::info!("Using NdArray CPU backend");
            launch::<Autodiff<NdArray>>(cfg, data, checkpoints, |_| NdArrayDevice::Cpu).map(drop)
        }
        1 => {
            tracing::info!("Using WGPU default device");
            launch::<Autodiff<Wgpu>>(cfg, data, checkpoints, |_| WgpuDevice::DefaultDevice).map(drop)
        }
        n => {
            tracing::info!("Using {} WGPU devices", n);
            launch::<Autodiff<Wgpu>>(cfg, data, checkpoints, WgpuDevice::DiscreteGpu).map(drop)
        }
    }
}

fn launch<B: AutodiffBackend>(
    cfg:         &TrainConfig,
    data:        &TrainingData,
    checkpoints: &CheckpointManager,
    device_for:  impl Fn(usize) -> B::Device + Sync,
) -> Result<Vec<UnifiedTransformer<B>>> {
    let world_size = cfg.world_size();
    let initial    = initial_params::<B>(cfg, data.vocab_size, &device_for(0))?;
    let initial    = initial.as_slice();

    if world_size == 1 {
        return InProcessLauncher.launch(1, |ctx| {
            train_worker::<B, _>(cfg, data, ctx, device_for(ctx.rank), initial, &LocalSync, checkpoints)
        });
    }

    let sync = ThreadAllReduce::new(world_size);
    ThreadLauncher.launch(world_size, |ctx| {
        let outcome =
            train_worker::<B, _>(cfg, data, ctx, device_for(ctx.rank), initial, &sync, checkpoints);
        if outcome.is_err() {
            sync.abort();
        }
        outcome
    })
}

/// Seed, build and serialise the starting weights once.
///
/// Every replica loads these bytes, so all of them begin
/// from the same parameters.
fn initial_params<B: AutodiffBackend>(
    cfg:        &TrainConfig,
    vocab_size: usize,
    device:     &B::Device,
) -> Result<Vec<u8>> {
    B::seed(cfg.seed);
    let model = cfg.model_config(vocab_size).init::<B>(device);
    encode_params::<B, _>(&model)
}

fn replica_model<B: AutodiffBackend>(
    cfg:        &TrainConfig,
    vocab_size: usize,
    initial:    &[u8],
    device:     &B::Device,
) -> Result<UnifiedTransformer<B>> {
    let model = cfg.model_config(vocab_size).init::<B>(device);
    decode_params::<B, _>(initial.to_vec(), model, device)
}

fn train_worker<B, G>(
    cfg:         &TrainConfig,
    data:        &TrainingData,
    ctx:         WorkerContext,
    device:      B::Device,
    initial:     &[u8],
    sync:        &G,
    checkpoints: &CheckpointManager,
) -> Result<UnifiedTransformer<B>>
where
    B: AutodiffBackend,
    G: GradientSync<B>,
{
    tracing::info!("Worker {}/{} on device {:?}", ctx.rank, ctx.world_size, device);

    // ── Build model ───────────────────────────────────────────────────────────
    let model = replica_model::<B>(cfg, data.vocab_size, initial, &device)?;
    if ctx.is_coordinator() {
        tracing::info!(
            "Model ready: {} layers, d_model={}",
            cfg.model.num_layers,
            cfg.model.d_model
        );
    }

    // ── AdamW + Noam ──────────────────────────────────────────────────────────
    let optimizer = AdamWConfig::new()
        .with_weight_decay(cfg.weight_decay as f32)
        .with_epsilon(1e-8)
        .init::<B, UnifiedTransformer<B>>();
    let schedule = NoamSchedule::new(cfg.lr, cfg.warmup_steps);
    let (model, optimizer, schedule) = restore(cfg, model, optimizer, schedule, &device)?;

    // ── Batch streams ─────────────────────────────────────────────────────────
    let train = DialogueLoader::new(
        Arc::clone(&data.train),
        BatchPlanner::train(cfg.batch_size, cfg.sort_pool_size, cfg.seed),
        DialogueBatcher::<B>::new(device.clone(), data.pad_id),
    )
    .sharded(ctx.rank, ctx.world_size);
    let valid = DialogueLoader::new(
        Arc::clone(&data.valid),
        BatchPlanner::eval(cfg.batch_size, cfg.sort_pool_size),
        DialogueBatcher::<B::InnerBackend>::new(device.clone(), data.pad_id),
    );
    let per_epoch = train.num_batches(0);
    tracing::info!("Worker {}: {} training batches per epoch", ctx.rank, per_epoch);
    if per_epoch == 0 {
        tracing::warn!(
            "Worker {}: fewer training batches than replicas ({}), epochs will be empty",
            ctx.rank,
            ctx.world_size
        );
    }

    // ── Train ─────────────────────────────────────────────────────────────────
    let metrics = if ctx.is_coordinator() {
        Some(MetricsLogger::new(checkpoints.dir())?)
    } else {
        None
    };
    let mut observer = ConsoleObserver::new(metrics);
    let session = Session::new(ctx, model, optimizer, schedule).train(
        &LoopSettings::from(cfg),
        &train,
        &valid,
        sync,
        checkpoints,
        &mut observer,
    )?;

    if ctx.is_coordinator() {
        tracing::info!("Training complete after {} steps", session.state.step);
    }
    Ok(session.model)
}

/// Apply `init_from_ckpt`, restoring optimizer and schedule when asked.
fn restore<B, O>(
    cfg:          &TrainConfig,
    model:        UnifiedTransformer<B>,
    optimizer:    O,
    mut schedule: NoamSchedule,
    device:       &B::Device,
) -> Result<(UnifiedTransformer<B>, O, NoamSchedule)>
where
    B: AutodiffBackend,
    O: Optimizer<UnifiedTransformer<B>, B>,
{
    let Some(prefix) = cfg.init_from_ckpt.as_deref() else {
        return Ok((model, optimizer, schedule));
    };
    let prefix = Path::new(prefix);

    if !cfg.load_optimizer {
        let model = load_params::<B, _>(prefix, model, device)?;
        tracing::info!("Loaded checkpoint from {}", prefix.display());
        return Ok((model, optimizer, schedule));
    }

    let (model, restored) = load_checkpoint(prefix, model, Some(optimizer), device)?;
    let (optimizer, step) = restored
        .ok_or_else(|| anyhow!("No optimizer state restored from '{}'", prefix.display()))?;
    schedule.restore(step);
    tracing::info!("Resuming from step {}", step);
    Ok((model, optimizer, schedule))
}
