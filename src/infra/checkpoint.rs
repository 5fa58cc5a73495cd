// ============================================================
// Layer 6 — Checkpoint I/O
// ============================================================
// A checkpoint is a name plus exactly two sibling files:
//
//   {dir}/{name}.params  — model record
//   {dir}/{name}.opt     — optimizer record + schedule step
//
// Both are Burn records serialised with the named MessagePack
// recorder at full precision. Burn's file recorders append
// their own extension, so the bytes recorder is used and the
// files are written here:
//
//   1. serialise both payloads in memory
//   2. write {file}.tmp for each
//   3. rename both into place
//
// Any failure removes the temporaries and propagates; a
// checkpoint is never half-written under its final name.
//
// Loading the optimizer is optional. When it is loaded the
// schedule step stored next to it is returned so training
// resumes on the same point of the learning-rate curve.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use anyhow::{anyhow, Context, Result};
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::schedule::NoamSchedule;

type CheckpointRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

pub const PARAMS_EXTENSION:    &str = "params";
pub const OPTIMIZER_EXTENSION: &str = "opt";
const CONFIG_FILE:             &str = "train_config.json";

/// `{prefix}.params`
pub fn params_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, PARAMS_EXTENSION)
}

/// `{prefix}.opt`
pub fn optimizer_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, OPTIMIZER_EXTENSION)
}

// Path::with_extension would eat a dotted checkpoint name.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

// ─── Save ─────────────────────────────────────────────────────────────────────
/// Write `{output_dir}/{name}.params` and `{output_dir}/{name}.opt`.
///
/// Returns the checkpoint prefix `{output_dir}/{name}`.
pub fn save_checkpoint<B, M, O>(
    model:      &M,
    optimizer:  &O,
    schedule:   &NoamSchedule,
    output_dir: &Path,
    name:       &str,
) -> Result<PathBuf>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let recorder = CheckpointRecorder::default();

    let params = encode_params::<B, M>(model)?;
    let opt_state = (optimizer.to_record(), schedule.current_step());
    let opt = Recorder::<B>::record(&recorder, opt_state, ())
        .map_err(|e| anyhow!("Failed to serialise optimizer state: {e:?}"))?;

    let prefix = output_dir.join(name);
    write_all_or_nothing(&[
        (params_path(&prefix),    params),
        (optimizer_path(&prefix), opt),
    ])?;

    tracing::debug!("Saved checkpoint '{}'", prefix.display());
    Ok(prefix)
}

/// Serialise the parameters of `model` in checkpoint format.
///
/// Reading the record materialises every lazily initialised
/// parameter on the calling thread.
pub fn encode_params<B, M>(model: &M) -> Result<Vec<u8>>
where
    B: Backend,
    M: Module<B>,
{
    Recorder::<B>::record(&CheckpointRecorder::default(), model.clone().into_record(), ())
        .map_err(|e| anyhow!("Failed to serialise model parameters: {e:?}"))
}

/// Load parameters produced by [`encode_params`] into `model` on `device`.
pub fn decode_params<B, M>(bytes: Vec<u8>, model: M, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let record = Recorder::<B>::load::<M::Record>(&CheckpointRecorder::default(), bytes, device)
        .map_err(|e| anyhow!("Malformed model parameters: {e:?}"))?;
    Ok(model.load_record(record))
}

fn write_all_or_nothing(files: &[(PathBuf, Vec<u8>)]) -> Result<()> {
    let staged: Vec<(PathBuf, &PathBuf)> = files
        .iter()
        .map(|(path, _)| (with_suffix(path, "tmp"), path))
        .collect();

    let outcome = (|| -> Result<()> {
        for ((tmp, _), (path, bytes)) in staged.iter().zip(files) {
            fs::write(tmp, bytes).with_context(|| {
                format!("Cannot write checkpoint file '{}'", path.display())
            })?;
        }
        for (tmp, path) in &staged {
            fs::rename(tmp, path).with_context(|| {
                format!("Cannot move checkpoint file into '{}'", path.display())
            })?;
        }
        Ok(())
    })();

    if outcome.is_err() {
        for (tmp, _) in &staged {
            let _ = fs::remove_file(tmp);
        }
    }
    outcome
}

// ─── Load ─────────────────────────────────────────────────────────────────────
/// Restore model parameters from `{prefix}.params`.
pub fn load_params<B, M>(prefix: &Path, model: M, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let path  = params_path(prefix);
    let bytes = fs::read(&path)
        .with_context(|| format!("Cannot read model parameters '{}'", path.display()))?;
    decode_params::<B, M>(bytes, model, device)
        .with_context(|| format!("Cannot load '{}'", path.display()))
}

/// Restore optimizer state from `{prefix}.opt`; returns it with the schedule step.
pub fn load_optimizer<B, M, O>(prefix: &Path, optimizer: O, device: &B::Device) -> Result<(O, usize)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let path  = optimizer_path(prefix);
    let bytes = fs::read(&path)
        .with_context(|| format!("Cannot read optimizer state '{}'", path.display()))?;
    let (record, step) =
        Recorder::<B>::load::<(O::Record, usize)>(&CheckpointRecorder::default(), bytes, device)
            .map_err(|e| anyhow!("Malformed optimizer state '{}': {e:?}", path.display()))?;
    Ok((optimizer.load_record(record), step))
}

/// Restore a checkpoint written by [`save_checkpoint`].
///
/// The optimizer is restored only when one is supplied; the
/// returned pair then carries the stored schedule step.
pub fn load_checkpoint<B, M, O>(
    prefix:    &Path,
    model:     M,
    optimizer: Option<O>,
    device:    &B::Device,
) -> Result<(M, Option<(O, usize)>)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let model = load_params::<B, M>(prefix, model, device)?;
    let optimizer = optimizer
        .map(|optim| load_optimizer::<B, M, O>(prefix, optim, device))
        .transpose()?;
    tracing::info!("Loaded checkpoint '{}'", prefix.display());
    Ok((model, optimizer))
}

// ─── CheckpointManager ────────────────────────────────────────────────────────
/// Owns the save directory: step-named checkpoints and the run config.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the directory (like `mkdir -p`).
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create save directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a checkpoint named after the global step.
    pub fn save<B, M, O>(
        &self,
        model:     &M,
        optimizer: &O,
        schedule:  &NoamSchedule,
        step:      usize,
    ) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        save_checkpoint::<B, M, O>(model, optimizer, schedule, &self.dir, &step.to_string())
    }

    /// Persist the run configuration as pretty JSON.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Read back a configuration written by [`Self::save_config`].
    #[cfg(test)]
    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::UnifiedTransformer;
    use crate::testing::{tiny_batch, tiny_model_config};
    use burn::{
        backend::{Autodiff, NdArray},
        optim::{AdamWConfig, GradientsParams},
    };

    type TestBackend = Autodiff<NdArray>;

    fn weights(model: &UnifiedTransformer<TestBackend>) -> burn::tensor::TensorData {
        model.word_embedding.weight.val().into_data()
    }

    fn grads_for(model: &UnifiedTransformer<TestBackend>) -> GradientsParams {
        let batch = tiny_batch::<TestBackend>(&Default::default());
        GradientsParams::from_grads(model.forward_loss(&batch).backward(), model)
    }

    #[test]
    fn test_save_writes_exactly_two_files() {
        let dir    = tempfile::tempdir().unwrap();
        let model  = tiny_model_config().init::<TestBackend>(&Default::default());
        let optim  = AdamWConfig::new().init::<TestBackend, UnifiedTransformer<TestBackend>>();
        let sched  = NoamSchedule::new(1e-3, 10);

        let prefix = save_checkpoint(&model, &optim, &sched, dir.path(), "7").unwrap();
        assert_eq!(prefix, dir.path().join("7"));

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["7.opt", "7.params"]);
    }

    #[test]
    fn test_round_trip_restores_parameters() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model  = tiny_model_config().init::<TestBackend>(&device);
        let optim  = AdamWConfig::new().init::<TestBackend, UnifiedTransformer<TestBackend>>();
        let prefix = save_checkpoint(&model, &optim, &NoamSchedule::new(1e-3, 10), dir.path(), "1")
            .unwrap();

        let fresh = tiny_model_config().init::<TestBackend>(&device);
        assert_ne!(weights(&fresh), weights(&model));

        let restored = load_params::<TestBackend, _>(&prefix, fresh, &device).unwrap();
        assert_eq!(weights(&restored), weights(&model));
    }

    #[test]
    fn test_round_trip_restores_optimizer_and_schedule_step() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = AdamWConfig::new().with_weight_decay(0.01);

        let mut model = tiny_model_config().with_dropout(0.0).init::<TestBackend>(&device);
        let mut optim = config.init::<TestBackend, UnifiedTransformer<TestBackend>>();
        let mut sched = NoamSchedule::new(1e-3, 10);
        model = optim.step(1e-2, model.clone(), grads_for(&model));
        sched.step();

        let prefix = save_checkpoint(&model, &optim, &sched, dir.path(), "1").unwrap();

        let (restored_model, restored) = load_checkpoint(
            &prefix,
            tiny_model_config().with_dropout(0.0).init::<TestBackend>(&device),
            Some(config.init::<TestBackend, UnifiedTransformer<TestBackend>>()),
            &device,
        )
        .unwrap();
        let (mut restored_optim, step) = restored.unwrap();
        assert_eq!(step, 1);

        // The same update from both optimizers must land on the same weights.
        let expected = optim.step(1e-2, model.clone(), grads_for(&model));
        let actual   = restored_optim.step(1e-2, restored_model.clone(), grads_for(&restored_model));
        weights(&actual).assert_approx_eq(&weights(&expected), 5);
    }

    #[test]
    fn test_optimizer_state_is_optional() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model  = tiny_model_config().init::<TestBackend>(&device);
        let optim  = AdamWConfig::new().init::<TestBackend, UnifiedTransformer<TestBackend>>();
        let prefix = save_checkpoint(&model, &optim, &NoamSchedule::new(1e-3, 10), dir.path(), "3")
            .unwrap();
        fs::remove_file(optimizer_path(&prefix)).unwrap();

        let requested = Some(AdamWConfig::new().init::<TestBackend, UnifiedTransformer<TestBackend>>());
        assert!(load_checkpoint(&prefix, model.clone(), requested, &device).is_err());

        let mut optim = Some(optim);

        // Same optimizer type, but nothing to restore into.
        optim.take();
        let (_, restored) = load_checkpoint(&prefix, model, optim, &device).unwrap();
        assert!(restored.is_none());
    }

    #[test]
    fn test_missing_or_malformed_checkpoint_is_an_error() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let prefix = dir.path().join("missing");
        let model  = tiny_model_config().init::<TestBackend>(&device);
        assert!(load_params::<TestBackend, _>(&prefix, model.clone(), &device).is_err());

        fs::write(params_path(&prefix), b"not a record").unwrap();
        assert!(load_params::<TestBackend, _>(&prefix, model, &device).is_err());
    }

    #[test]
    fn test_dotted_names_keep_their_suffix() {
        let prefix = Path::new("/tmp/run/final.best");
        assert_eq!(params_path(prefix), Path::new("/tmp/run/final.best.params"));
        assert_eq!(optimizer_path(prefix), Path::new("/tmp/run/final.best.opt"));
    }

    #[test]
    fn test_config_round_trip() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nested/save")).unwrap();
        let cfg     = TrainConfig::default();
        manager.save_config(&cfg).unwrap();
        assert_eq!(manager.load_config().unwrap(), cfg);
    }
}
