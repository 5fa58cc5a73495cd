// ============================================================
// Layer 5 — Data-Parallel Launch and Gradient Sync
// ============================================================
// Data parallelism on one host, one replica per device:
//
//   Launcher::launch(world_size, worker)
//       ├── worker(WorkerContext { rank: 0, .. })  ← coordinator
//       ├── worker(WorkerContext { rank: 1, .. })
//       └── ...
//
// Every replica trains on its own shard of batches. After each
// backward pass the replicas meet in GradientSync::all_reduce,
// which replaces every local gradient with the mean across
// replicas, so identical replicas stay identical.
//
// ThreadAllReduce keys parameters by the order a ModuleVisitor
// reaches them. Replicas of the same architecture visit their
// parameters in the same order even though their ParamIds
// differ.
//
// Reference: Rust Book §16 (Fearless Concurrency)

use anyhow::{anyhow, bail, Result};
use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, TensorData},
};
use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

// ─── WorkerContext ────────────────────────────────────────────────────────────
/// Identity of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank:       usize,
    pub world_size: usize,
}

impl WorkerContext {
    pub fn single() -> Self {
        Self { rank: 0, world_size: 1 }
    }

    /// Rank 0 logs, evaluates and writes checkpoints.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }
}

// ─── Launcher ─────────────────────────────────────────────────────────────────
/// Starts `world_size` copies of a worker function.
pub trait Launcher {
    /// Runs every replica to completion.
    ///
    /// Returns the outputs in rank order, or the first error.
    fn launch<T, F>(&self, world_size: usize, worker: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(WorkerContext) -> Result<T> + Sync;
}

/// Runs the single replica on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessLauncher;

impl Launcher for InProcessLauncher {
    fn launch<T, F>(&self, world_size: usize, worker: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(WorkerContext) -> Result<T> + Sync,
    {
        if world_size != 1 {
            bail!("in-process launcher runs exactly one replica, got {world_size}");
        }
        Ok(vec![worker(WorkerContext::single())?])
    }
}

/// One scoped OS thread per replica.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLauncher;

impl Launcher for ThreadLauncher {
    fn launch<T, F>(&self, world_size: usize, worker: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(WorkerContext) -> Result<T> + Sync,
    {
        if world_size == 0 {
            bail!("cannot launch zero replicas");
        }
        let worker = &worker;

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(world_size);
            for rank in 0..world_size {
                let handle = std::thread::Builder::new()
                    .name(format!("worker-{rank}"))
                    .spawn_scoped(scope, move || worker(WorkerContext { rank, world_size }))?;
                handles.push(handle);
            }

            let mut outputs     = Vec::with_capacity(world_size);
            let mut first_error = None;
            for (rank, handle) in handles.into_iter().enumerate() {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("worker {rank} panicked")));
                match outcome {
                    Ok(output) => outputs.push(output),
                    Err(e) => {
                        tracing::error!("worker {} failed: {:#}", rank, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            first_error.map_or(Ok(outputs), Err)
        })
    }
}

// ─── GradientSync ─────────────────────────────────────────────────────────────
/// Combines the gradients of all replicas.
pub trait GradientSync<B: AutodiffBackend> {
    fn all_reduce<M: AutodiffModule<B>>(
        &self,
        model: &M,
        grads: GradientsParams,
    ) -> Result<GradientsParams>;
}

/// Single replica: gradients pass through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSync;

impl<B: AutodiffBackend> GradientSync<B> for LocalSync {
    fn all_reduce<M: AutodiffModule<B>>(
        &self,
        _model: &M,
        grads:  GradientsParams,
    ) -> Result<GradientsParams> {
        Ok(grads)
    }
}

// ─── PhaseBarrier ─────────────────────────────────────────────────────────────
// std::sync::Barrier cannot be released early; a failed replica
// would leave the others waiting forever.
struct PhaseBarrier {
    parties: usize,
    state:   Mutex<BarrierState>,
    wake:    Condvar,
}

struct BarrierState {
    arrived:    usize,
    generation: u64,
    aborted:    bool,
}

impl PhaseBarrier {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState { arrived: 0, generation: 0, aborted: false }),
            wake:  Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until every party arrives. Returns true for the last arrival.
    fn wait(&self) -> Result<bool> {
        let mut state = self.lock();
        if state.aborted {
            bail!("gradient synchronization aborted by another worker");
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived     = 0;
            state.generation += 1;
            self.wake.notify_all();
            return Ok(true);
        }
        while state.generation == generation && !state.aborted {
            state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.generation == generation {
            bail!("gradient synchronization aborted by another worker");
        }
        Ok(false)
    }

    fn abort(&self) {
        self.lock().aborted = true;
        self.wake.notify_all();
    }
}

// ─── ThreadAllReduce ──────────────────────────────────────────────────────────
type Slot = (Vec<f32>, Vec<usize>);

/// Mean all-reduce between replicas running as threads of one process.
///
/// Every call runs three barrier-separated phases:
///   1. each replica adds its gradients into shared slots
///   2. each replica reads back the sums divided by world_size
///   3. the last replica out clears the slots for the next step
pub struct ThreadAllReduce {
    world_size: usize,
    slots:      Mutex<HashMap<usize, Slot>>,
    barrier:    PhaseBarrier,
}

impl ThreadAllReduce {
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            slots:   Mutex::new(HashMap::new()),
            barrier: PhaseBarrier::new(world_size),
        }
    }

    /// Releases every replica blocked in `all_reduce` with an error.
    pub fn abort(&self) {
        self.barrier.abort();
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<usize, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: AutodiffBackend> GradientSync<B> for ThreadAllReduce {
    fn all_reduce<M: AutodiffModule<B>>(
        &self,
        model: &M,
        grads: GradientsParams,
    ) -> Result<GradientsParams> {
        if self.world_size == 1 {
            return Ok(grads);
        }

        // ── Phase 1: accumulate ───────────────────────────────────────────────
        let mut accumulate = Accumulate::<B> { owner: self, grads: &grads, index: 0, _b: PhantomData };
        model.visit(&mut accumulate);
        self.barrier.wait()?;

        // ── Phase 2: read back the mean ───────────────────────────────────────
        let mut grads = grads;
        let mut average = Average::<B> {
            owner: self,
            grads: &mut grads,
            index: 0,
            _b:    PhantomData,
        };
        model.visit(&mut average);
        let last = self.barrier.wait()?;

        // ── Phase 3: reset ────────────────────────────────────────────────────
        if last {
            self.slots().clear();
        }
        self.barrier.wait()?;

        Ok(grads)
    }
}

struct Accumulate<'a, B: AutodiffBackend> {
    owner: &'a ThreadAllReduce,
    grads: &'a GradientsParams,
    index: usize,
    _b:    PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Accumulate<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let index = self.index;
        self.index += 1;

        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else { return };
        let data   = grad.into_data();
        let dims   = data.shape.clone();
        let values = data.iter::<f32>();

        let mut slots = self.owner.slots();
        match slots.get_mut(&index) {
            Some((sum, _)) => sum.iter_mut().zip(values).for_each(|(s, v)| *s += v),
            None           => {
                slots.insert(index, (values.collect(), dims));
            }
        }
    }
}

struct Average<'a, B: AutodiffBackend> {
    owner: &'a ThreadAllReduce,
    grads: &'a mut GradientsParams,
    index: usize,
    _b:    PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Average<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let index = self.index;
        self.index += 1;

        let slot = self.owner.slots().get(&index).cloned();
        let Some((sum, dims)) = slot else { return };

        let scale = 1.0 / self.owner.world_size as f32;
        let mean: Vec<f32> = sum.into_iter().map(|v| v * scale).collect();
        let grad = Tensor::<B::InnerBackend, D>::from_data(
            TensorData::new(mean, dims),
            &tensor.device(),
        );
        self.grads.remove::<B::InnerBackend, D>(id);
        self.grads.register::<B::InnerBackend, D>(id, grad);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        module::Param,
        nn::Linear,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestBackend = Autodiff<NdArray>;

    fn zero_linear(device: &<TestBackend as Backend>::Device) -> Linear<TestBackend> {
        Linear {
            weight: Param::from_tensor(Tensor::zeros([3, 2], device)),
            bias:   None,
        }
    }

    #[test]
    fn test_thread_launcher_runs_every_rank() {
        let seen = AtomicUsize::new(0);
        ThreadLauncher
            .launch(3, |ctx| {
                assert_eq!(ctx.world_size, 3);
                seen.fetch_add(1 << ctx.rank, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0b111);
    }

    #[test]
    fn test_thread_launcher_returns_outputs_in_rank_order() {
        let outputs = ThreadLauncher.launch(4, |ctx| Ok(ctx.rank * 10)).unwrap();
        assert_eq!(outputs, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_failed_or_panicking_worker_fails_launch() {
        let failed = ThreadLauncher.launch(2, |ctx| {
            if ctx.rank == 1 { bail!("boom") } else { Ok(()) }
        });
        assert!(failed.unwrap_err().to_string().contains("boom"));

        let panicked = ThreadLauncher.launch(2, |ctx| {
            if ctx.rank == 0 { panic!("worker crash") }
            Ok(())
        });
        assert!(panicked.is_err());
    }

    #[test]
    fn test_in_process_launcher_is_single_replica() {
        let runs = AtomicUsize::new(0);
        InProcessLauncher
            .launch(1, |ctx| {
                assert!(ctx.is_coordinator());
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(InProcessLauncher.launch(2, |_| Ok(())).is_err());
    }

    #[test]
    fn test_all_reduce_averages_across_replicas() {
        let sync    = ThreadAllReduce::new(2);
        let results = Mutex::new(vec![Vec::new(); 2]);

        ThreadLauncher
            .launch(2, |ctx| {
                let device = Default::default();
                let model  = zero_linear(&device);
                let input  = if ctx.rank == 0 { [[1.0f32, 2.0, 3.0]] } else { [[3.0f32, 2.0, 1.0]] };
                let x      = Tensor::<TestBackend, 2>::from_floats(input, &device);

                // d(sum(x·W))/dW[i][j] = x[i]
                let grads = model.forward(x).sum().backward();
                let grads = GradientsParams::from_grads(grads, &model);
                // Run twice: the slots must be reset between steps.
                let grads = sync.all_reduce(&model, grads)?;
                let grads = sync.all_reduce(&model, grads)?;

                let weight = grads
                    .get::<NdArray, 2>(model.weight.id)
                    .ok_or_else(|| anyhow!("missing weight gradient"))?;
                results.lock().unwrap()[ctx.rank] = weight.into_data().iter::<f32>().collect();
                Ok(())
            })
            .unwrap();

        for grads in results.into_inner().unwrap() {
            assert_eq!(grads, vec![2.0; 6]);
        }
    }

    #[test]
    fn test_abort_releases_waiting_replicas() {
        let sync = ThreadAllReduce::new(2);
        let outcome = ThreadLauncher.launch(2, |ctx| {
            if ctx.rank == 1 {
                sync.abort();
                bail!("replica failed before syncing");
            }
            let device = Default::default();
            let model  = zero_linear(&device);
            let x      = Tensor::<TestBackend, 2>::ones([1, 3], &device);
            let grads  = GradientsParams::from_grads(model.forward(x).sum().backward(), &model);
            sync.all_reduce(&model, grads).map(|_| ())
        });
        assert!(outcome.is_err());
    }

    #[test]
    fn test_local_sync_is_identity() {
        let device = Default::default();
        let model  = zero_linear(&device);
        let x      = Tensor::<TestBackend, 2>::ones([1, 3], &device);
        let grads  = GradientsParams::from_grads(model.forward(x).sum().backward(), &model);
        let grads  = GradientSync::<TestBackend>::all_reduce(&LocalSync, &model, grads).unwrap();
        let weight = grads.get::<NdArray, 2>(model.weight.id).unwrap();
        assert_eq!(weight.into_data().iter::<f32>().collect::<Vec<_>>(), vec![1.0; 6]);
    }
}
