// ============================================================
// Layer 4 — Dialogue Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<DialogueSample>
// into the six tensors the model consumes.
//
// Samples have different lengths, so every sequence is padded
// to the longest one in the batch (S):
//
//   token_ids, type_ids, pos_ids : [batch, S]     (Int)
//   generation_mask              : [batch, S, S]  (Int, 1 = may attend)
//   tgt_label                    : [T]            (Int)
//   tgt_pos                      : [T]            (Int)
//
// Targets are packed: T is the number of target tokens in the
// whole batch and tgt_pos indexes the flattened [batch * S]
// hidden states, i.e. b * S + position.
//
// Generation mask for a sample with src_len context tokens:
//   - context rows attend every context column
//   - response rows attend every context column and response
//     columns up to and including themselves
//   - padding rows attend only themselves
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::DialogueSample;

// ─── DialogueBatch ────────────────────────────────────────────────────────────
/// A padded batch ready for the forward pass.
#[derive(Debug, Clone)]
pub struct DialogueBatch<B: Backend> {
    pub token_ids:       Tensor<B, 2, Int>,
    pub type_ids:        Tensor<B, 2, Int>,
    pub pos_ids:         Tensor<B, 2, Int>,
    pub generation_mask: Tensor<B, 3, Int>,
    pub tgt_label:       Tensor<B, 1, Int>,
    pub tgt_pos:         Tensor<B, 1, Int>,
}

impl<B: Backend> DialogueBatch<B> {
    /// Number of target tokens scored in this batch
    pub fn target_count(&self) -> usize {
        self.tgt_label.dims()[0]
    }
}

// ─── DialogueBatcher ──────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct DialogueBatcher<B: Backend> {
    /// The device to create tensors on
    pub device: B::Device,
    /// Token id written into padding positions
    pub pad_id: u32,
}

impl<B: Backend> DialogueBatcher<B> {
    pub fn new(device: B::Device, pad_id: u32) -> Self {
        Self { device, pad_id }
    }
}

/// Row-major [seq_len, seq_len] mask for one sample padded to `seq_len`.
pub fn generation_mask(src_len: usize, len: usize, seq_len: usize) -> Vec<i32> {
    let mut mask = vec![0i32; seq_len * seq_len];
    for row in 0..seq_len {
        for col in 0..seq_len {
            let allowed = if row >= len {
                col == row
            } else if col >= len {
                false
            } else if row < src_len {
                col < src_len
            } else {
                col < src_len || col <= row
            };
            if allowed {
                mask[row * seq_len + col] = 1;
            }
        }
    }
    mask
}

impl<B: Backend> Batcher<DialogueSample, DialogueBatch<B>> for DialogueBatcher<B> {
    fn batch(&self, items: Vec<DialogueSample>) -> DialogueBatch<B> {
        let batch_size = items.len();
        let seq_len    = items.iter().map(DialogueSample::len).max().unwrap_or(0);

        let mut tokens    = Vec::with_capacity(batch_size * seq_len);
        let mut types     = Vec::with_capacity(batch_size * seq_len);
        let mut positions = Vec::with_capacity(batch_size * seq_len);
        let mut masks     = Vec::with_capacity(batch_size * seq_len * seq_len);
        let mut labels    = Vec::new();
        let mut label_pos = Vec::new();

        for (b, sample) in items.iter().enumerate() {
            let pad = seq_len - sample.len();

            tokens.extend(sample.token_ids.iter().map(|&x| x as i32));
            tokens.extend(std::iter::repeat(self.pad_id as i32).take(pad));

            types.extend(sample.type_ids.iter().map(|&x| x as i32));
            types.extend(std::iter::repeat(0).take(pad));

            positions.extend(sample.pos_ids.iter().map(|&x| x as i32));
            positions.extend(std::iter::repeat(0).take(pad));

            masks.extend(generation_mask(sample.src_len, sample.len(), seq_len));

            labels.extend(sample.labels.iter().map(|&x| x as i32));
            label_pos.extend(
                sample.label_positions.iter().map(|&p| (b * seq_len + p) as i32),
            );
        }

        let token_ids = Tensor::<B, 1, Int>::from_ints(tokens.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let type_ids = Tensor::<B, 1, Int>::from_ints(types.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let pos_ids = Tensor::<B, 1, Int>::from_ints(positions.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let generation_mask = Tensor::<B, 1, Int>::from_ints(masks.as_slice(), &self.device)
            .reshape([batch_size, seq_len, seq_len]);
        let tgt_label = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);
        let tgt_pos   = Tensor::<B, 1, Int>::from_ints(label_pos.as_slice(), &self.device);

        DialogueBatch { token_ids, type_ids, pos_ids, generation_mask, tgt_label, tgt_pos }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn ints<const D: usize>(t: Tensor<TestBackend, D, Int>) -> Vec<i64> {
        t.into_data().iter::<i64>().collect()
    }

    #[test]
    fn test_generation_mask_layout() {
        // src_len 2, len 4, padded to 5
        let m = generation_mask(2, 4, 5);
        let rows: Vec<&[i32]> = m.chunks(5).collect();
        assert_eq!(rows[0], &[1, 1, 0, 0, 0]);
        assert_eq!(rows[1], &[1, 1, 0, 0, 0]);
        assert_eq!(rows[2], &[1, 1, 1, 0, 0]);
        assert_eq!(rows[3], &[1, 1, 1, 1, 0]);
        assert_eq!(rows[4], &[0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_batch_shapes_and_packed_targets() {
        let long  = DialogueSample::from_ids(&[vec![10, 11]], &[20], 2, 3, 32);
        let short = DialogueSample::from_ids(&[vec![10]], &[20], 2, 3, 32);
        assert_eq!((long.len(), short.len()), (7, 6));

        let batcher = DialogueBatcher::<TestBackend>::new(Default::default(), 0);
        let batch = batcher.batch(vec![long.clone(), short.clone()]);

        assert_eq!(batch.token_ids.dims(), [2, 7]);
        assert_eq!(batch.generation_mask.dims(), [2, 7, 7]);
        assert_eq!(batch.target_count(), long.labels.len() + short.labels.len());

        // second sample is padded with the pad id
        let tokens = ints(batch.token_ids);
        assert_eq!(tokens[13], 0);

        // packed positions index the flattened [batch * seq] layout
        let pos = ints(batch.tgt_pos);
        assert_eq!(pos[0], long.label_positions[0] as i64);
        assert_eq!(pos[long.labels.len()], (7 + short.label_positions[0]) as i64);
    }
}
