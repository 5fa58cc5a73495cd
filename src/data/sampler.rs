// ============================================================
// Layer 4 — Token-Budget Batch Planner
// ============================================================
// Groups sample indices into batches whose padded size stays
// under a token budget:
//
//   1. shuffle all indices (training only, seeded per epoch)
//   2. cut them into pools of `sort_pool_size`
//   3. sort each pool by length so neighbours pad cheaply
//   4. grow a batch while max_len * count <= max_tokens
//   5. shuffle the batch order (training only)
//
// A sample longer than the budget on its own becomes a batch
// of one. `shard` then deals batches to data-parallel workers.
//
// Reference: rand crate documentation (SliceRandom, StdRng)

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Plans the batches of one epoch from sample lengths.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    /// Upper bound on padded tokens per batch
    pub max_tokens:     usize,
    /// Number of samples sorted together by length
    pub sort_pool_size: usize,
    /// Shuffle samples and batch order every epoch
    pub shuffle:        bool,
    pub seed:           u64,
}

impl BatchPlanner {
    /// Shuffled planner for a training stream.
    pub fn train(max_tokens: usize, sort_pool_size: usize, seed: u64) -> Self {
        Self { max_tokens, sort_pool_size, shuffle: true, seed }
    }

    /// Deterministic planner for a validation stream.
    pub fn eval(max_tokens: usize, sort_pool_size: usize) -> Self {
        Self { max_tokens, sort_pool_size, shuffle: false, seed: 0 }
    }

    /// Return the batches (lists of sample indices) for `epoch`.
    pub fn plan(&self, lengths: &[usize], epoch: usize) -> Vec<Vec<usize>> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));

        let mut order: Vec<usize> = (0..lengths.len()).collect();
        if self.shuffle {
            order.shuffle(&mut rng);
        }

        let mut batches = Vec::new();
        for pool in order.chunks(self.sort_pool_size.max(1)) {
            let mut pool = pool.to_vec();
            pool.sort_by_key(|&i| lengths[i]);

            let mut current: Vec<usize> = Vec::new();
            let mut max_len = 0usize;
            for idx in pool {
                let len = lengths[idx];
                let grown = max_len.max(len) * (current.len() + 1);
                if !current.is_empty() && grown > self.max_tokens {
                    batches.push(std::mem::take(&mut current));
                    max_len = 0;
                }
                max_len = max_len.max(len);
                current.push(idx);
            }
            if !current.is_empty() {
                batches.push(current);
            }
        }

        if self.shuffle {
            batches.shuffle(&mut rng);
        }
        batches
    }
}

/// Keep the batches belonging to `rank`.
///
/// The list is first truncated to a multiple of `world_size`
/// so every worker receives the same number of batches.
pub fn shard<T>(mut batches: Vec<T>, rank: usize, world_size: usize) -> Vec<T> {
    if world_size <= 1 {
        return batches;
    }
    let even = batches.len() - batches.len() % world_size;
    batches.truncate(even);
    batches
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % world_size == rank)
        .map(|(_, batch)| batch)
        .collect()
}
