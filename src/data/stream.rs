// ============================================================
// Layer 4 — Batch Streams
// ============================================================
// A BatchSource yields the batches of one epoch in order.
// The training and evaluation loops only see this trait, so
// tests can feed them a plain Vec of batches.
//
// DialogueLoader is the production source: it plans batches
// over a shared dataset, keeps this worker's shard, and runs
// the batcher lazily as the loop pulls.

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use std::sync::Arc;

use crate::data::{
    batcher::{DialogueBatch, DialogueBatcher},
    dataset::DialogueDataset,
    sampler::{shard, BatchPlanner},
};

/// Anything that can stream the batches of an epoch.
pub trait BatchSource<B: Backend> {
    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = DialogueBatch<B>> + '_>;
}

impl<B: Backend> BatchSource<B> for Vec<DialogueBatch<B>> {
    fn batches(&self, _epoch: usize) -> Box<dyn Iterator<Item = DialogueBatch<B>> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// Planned, sharded, lazily batched view of a dataset.
pub struct DialogueLoader<B: Backend> {
    dataset:    Arc<DialogueDataset>,
    planner:    BatchPlanner,
    batcher:    DialogueBatcher<B>,
    rank:       usize,
    world_size: usize,
}

impl<B: Backend> DialogueLoader<B> {
    pub fn new(
        dataset: Arc<DialogueDataset>,
        planner: BatchPlanner,
        batcher: DialogueBatcher<B>,
    ) -> Self {
        Self { dataset, planner, batcher, rank: 0, world_size: 1 }
    }

    /// Restrict the stream to one worker's shard.
    pub fn sharded(mut self, rank: usize, world_size: usize) -> Self {
        self.rank       = rank;
        self.world_size = world_size.max(1);
        self
    }

    fn plan(&self, epoch: usize) -> Vec<Vec<usize>> {
        let plan = self.planner.plan(&self.dataset.lengths(), epoch);
        shard(plan, self.rank, self.world_size)
    }

    /// Number of batches this worker will see in `epoch`
    pub fn num_batches(&self, epoch: usize) -> usize {
        self.plan(epoch).len()
    }
}

impl<B: Backend> BatchSource<B> for DialogueLoader<B> {
    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = DialogueBatch<B>> + '_> {
        let plan = self.plan(epoch);
        Box::new(plan.into_iter().map(move |indices| {
            let items = indices
                .into_iter()
                .filter_map(|i| self.dataset.get(i))
                .collect();
            self.batcher.batch(items)
        }))
    }
}
