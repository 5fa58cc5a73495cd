// Shared fixtures for unit tests: a model small enough to run
// on the CPU backend in milliseconds, hand-built batches and
// a small on-disk corpus.

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use std::{fs, path::Path};

use crate::application::config::ModelSettings;
use crate::data::{
    batcher::{DialogueBatch, DialogueBatcher},
    dataset::DialogueSample,
};
use crate::ml::model::UnifiedTransformerConfig;

pub const VOCAB_SIZE: usize = 16;
pub const PAD: u32 = 0;
pub const BOS: u32 = 2;
pub const EOS: u32 = 3;

pub fn tiny_model_config() -> UnifiedTransformerConfig {
    UnifiedTransformerConfig::new(VOCAB_SIZE, 2, 16, 8, 2, 1)
}

/// Two dialogues of different lengths, so the batch carries padding.
pub fn tiny_samples() -> Vec<DialogueSample> {
    vec![
        DialogueSample::from_ids(&[vec![5, 6], vec![7]], &[8, 9, 10], BOS, EOS, 16),
        DialogueSample::from_ids(&[vec![11]], &[12], BOS, EOS, 16),
    ]
}

pub fn tiny_batch<B: Backend>(device: &B::Device) -> DialogueBatch<B> {
    DialogueBatcher::<B>::new(device.clone(), PAD).batch(tiny_samples())
}

/// Paths of a tiny on-disk corpus plus model settings that fit it.
pub struct Corpus {
    pub vocab: String,
    pub train: String,
    pub valid: String,
    pub model: ModelSettings,
}

/// Write vocab.txt, train.txt and valid.txt under `dir`.
///
/// Special ids match the constants above: [PAD]=0, [CLS]=2, [SEP]=3.
pub fn write_corpus(dir: &Path) -> Corpus {
    let mut vocab = String::from("[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\n");
    for i in 0..10 {
        vocab.push_str(&format!("w{i}\n"));
    }

    let line = |i: usize| {
        let w = |k: usize| format!("w{}", (i + k) % 10);
        format!("{} {} {}\t{} {}\t{} {} {}\n", w(0), w(1), w(2), w(3), w(4), w(5), w(6), w(7))
    };
    let train: String = (0..12).map(line).collect();
    let valid: String = (0..4).map(|i| line(i + 3)).collect();

    let write = |name: &str, text: &str| {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path.to_string_lossy().into_owned()
    };

    Corpus {
        vocab: write("vocab.txt", &vocab),
        train: write("train.txt", &train),
        valid: write("valid.txt", &valid),
        model: ModelSettings {
            num_layers:  1,
            d_model:     8,
            nhead:       2,
            dropout:     0.0,
            max_seq_len: 32,
            ..ModelSettings::default()
        },
    }
}
