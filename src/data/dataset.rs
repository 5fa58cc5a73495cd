// ============================================================
// Layer 4 — Dialogue Samples and Dataset
// ============================================================
// Encodes a Dialogue into the unified-transformer layout:
//
//   src = [CLS] turn_1 [SEP] turn_2 [SEP] ... turn_n [SEP]
//   tgt = [CLS] response [SEP]
//
//   token_ids = src ++ tgt
//   type_ids  = 0 for every src token, 1 for every tgt token
//   pos_ids   = 0, 1, 2, ...
//
// The model predicts tgt[i + 1] from the output at position
// len(src) + i, so:
//
//   labels          = tgt[1..]
//   label_positions = len(src) + 0 .. len(src) + len(tgt) - 1
//
// Truncation keeps the sequence within max_seq_len:
//   - tgt is cut to at most max_seq_len / 2 tokens, keeping [SEP]
//   - src is cut from the left, keeping the leading [CLS],
//     so the most recent turns survive
//
// Reference: Burn Book §4 (Datasets)

use anyhow::Result;
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::data::vocab::Vocabulary;
use crate::domain::dialogue::Dialogue;

/// One encoded dialogue, unpadded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueSample {
    pub token_ids:       Vec<u32>,
    pub type_ids:        Vec<u32>,
    pub pos_ids:         Vec<u32>,
    /// Number of leading context tokens (type 0)
    pub src_len:         usize,
    pub labels:          Vec<u32>,
    /// Positions (within this sample) whose outputs predict `labels`
    pub label_positions: Vec<usize>,
}

impl DialogueSample {
    /// Tokenize and encode one dialogue.
    pub fn encode(dialogue: &Dialogue, vocab: &Vocabulary, max_seq_len: usize) -> Result<Self> {
        let context = dialogue
            .context
            .iter()
            .map(|turn| vocab.encode(turn))
            .collect::<Result<Vec<_>>>()?;
        let response = vocab.encode(&dialogue.response)?;
        Ok(Self::from_ids(&context, &response, vocab.bos_id(), vocab.eos_id(), max_seq_len))
    }

    /// Build the layout from already-encoded turns.
    ///
    /// `max_seq_len` must be at least 4.
    pub fn from_ids(
        context:     &[Vec<u32>],
        response:    &[u32],
        bos_id:      u32,
        eos_id:      u32,
        max_seq_len: usize,
    ) -> Self {
        let max_tgt_len = max_seq_len / 2;
        let mut tgt = Vec::with_capacity(response.len() + 2);
        tgt.push(bos_id);
        tgt.extend_from_slice(response);
        tgt.push(eos_id);
        if tgt.len() > max_tgt_len {
            tgt.truncate(max_tgt_len - 1);
            tgt.push(eos_id);
        }

        let mut src = vec![bos_id];
        for turn in context {
            src.extend_from_slice(turn);
            src.push(eos_id);
        }
        let src_budget = max_seq_len - tgt.len();
        if src.len() > src_budget {
            let keep = src_budget - 1;
            let tail = src.split_off(src.len() - keep);
            src.truncate(1);
            src.extend(tail);
        }

        let src_len = src.len();
        let total   = src_len + tgt.len();

        let labels = tgt[1..].to_vec();
        let label_positions = (0..tgt.len() - 1).map(|i| src_len + i).collect();

        let type_ids = std::iter::repeat(0)
            .take(src_len)
            .chain(std::iter::repeat(1).take(tgt.len()))
            .collect();
        let pos_ids = (0..total as u32).collect();

        let mut token_ids = src;
        token_ids.extend(tgt);

        Self { token_ids, type_ids, pos_ids, src_len, labels, label_positions }
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }
}

/// In-memory collection of encoded samples.
pub struct DialogueDataset {
    samples: Vec<DialogueSample>,
}

impl DialogueDataset {
    pub fn new(samples: Vec<DialogueSample>) -> Self { Self { samples } }

    /// Encode every dialogue with the given vocabulary.
    pub fn from_dialogues(
        dialogues:   &[Dialogue],
        vocab:       &Vocabulary,
        max_seq_len: usize,
    ) -> Result<Self> {
        let samples = dialogues
            .iter()
            .map(|d| DialogueSample::encode(d, vocab, max_seq_len))
            .collect::<Result<Vec<_>>>()?;
        let tokens: usize = samples.iter().map(DialogueSample::len).sum();
        tracing::info!("Encoded {} samples ({} tokens)", samples.len(), tokens);
        Ok(Self::new(samples))
    }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Sequence length of every sample, in index order
    pub fn lengths(&self) -> Vec<usize> {
        self.samples.iter().map(DialogueSample::len).collect()
    }
}

impl Dataset<DialogueSample> for DialogueDataset {
    fn get(&self, index: usize) -> Option<DialogueSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const BOS: u32 = 2;
    const EOS: u32 = 3;

    #[test]
    fn test_layout_without_truncation() {
        let s = DialogueSample::from_ids(&[vec![10, 11], vec![12]], &[20, 21], BOS, EOS, 64);
        assert_eq!(s.token_ids, vec![BOS, 10, 11, EOS, 12, EOS, BOS, 20, 21, EOS]);
        assert_eq!(s.type_ids,  vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(s.pos_ids,   (0..10).collect::<Vec<u32>>());
        assert_eq!(s.src_len, 6);
        assert_eq!(s.labels, vec![20, 21, EOS]);
        assert_eq!(s.label_positions, vec![6, 7, 8]);
    }

    #[test]
    fn test_labels_are_next_tokens_of_their_positions() {
        let s = DialogueSample::from_ids(&[vec![10]], &[20, 21, 22], BOS, EOS, 64);
        for (label, pos) in s.labels.iter().zip(&s.label_positions) {
            assert_eq!(*label, s.token_ids[pos + 1]);
        }
    }

    #[test]
    fn test_context_is_truncated_from_the_left() {
        let context = vec![vec![10, 11, 12, 13], vec![14, 15]];
        let s = DialogueSample::from_ids(&context, &[20], BOS, EOS, 8);
        // tgt = [BOS, 20, EOS]; src budget = 5 → [BOS] + last 4 of src
        assert_eq!(s.token_ids, vec![BOS, EOS, 14, 15, EOS, BOS, 20, EOS]);
        assert_eq!(s.src_len, 5);
        assert_eq!(s.len(), 8);
    }

    #[test]
    fn test_response_is_truncated_keeping_end_token() {
        let s = DialogueSample::from_ids(&[vec![10]], &[20, 21, 22, 23, 24], BOS, EOS, 8);
        // max tgt = 4 → [BOS, 20, 21, EOS]
        assert_eq!(&s.token_ids[s.src_len..], &[BOS, 20, 21, EOS]);
        assert!(s.len() <= 8);
    }

    #[test]
    fn test_dataset_trait() {
        let s = DialogueSample::from_ids(&[vec![10]], &[20], BOS, EOS, 16);
        let ds = DialogueDataset::new(vec![s.clone(), s]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.lengths(), vec![6, 6]);
        assert!(ds.get(2).is_none());
    }
}
