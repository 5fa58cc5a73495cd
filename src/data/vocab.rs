// ============================================================
// Layer 4 — Vocabulary
// ============================================================
// Maps pre-tokenized text to integer ids.
//
// The vocabulary file has one entry per line, either
//   token            (id = line number, starting at 0)
//   token<TAB>id     (explicit id)
//
// The five special tokens must be present:
//   [UNK]  unknown      [CLS]  begin of turn
//   [SEP]  end of turn  [MASK] mask        [PAD] padding
//
// Instead of training a tokenizer, a WordLevel tokenizer JSON
// is written in memory from the vocabulary and loaded with
// `Tokenizer::from_str`. Tokens are split on whitespace only,
// since the corpus is already tokenized.
//
// Reference: tokenizers crate documentation (WordLevel model)

use anyhow::{anyhow, bail, Context, Result};
use std::{collections::HashMap, fs, path::Path, str::FromStr};
use tokenizers::Tokenizer;

pub const UNK_TOKEN:  &str = "[UNK]";
pub const BOS_TOKEN:  &str = "[CLS]";
pub const EOS_TOKEN:  &str = "[SEP]";
pub const MASK_TOKEN: &str = "[MASK]";
pub const PAD_TOKEN:  &str = "[PAD]";

const SPECIAL_TOKENS: [&str; 5] = [UNK_TOKEN, BOS_TOKEN, EOS_TOKEN, MASK_TOKEN, PAD_TOKEN];

/// Token ↔ id mapping with the special ids the model needs.
pub struct Vocabulary {
    tokenizer: Tokenizer,
    size:      usize,
    unk_id:    u32,
    bos_id:    u32,
    eos_id:    u32,
    mask_id:   u32,
    pad_id:    u32,
}

impl Vocabulary {
    /// Load a vocabulary file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read vocabulary file '{}'", path.display()))?;
        let vocab = Self::parse(&text)
            .with_context(|| format!("Invalid vocabulary file '{}'", path.display()))?;
        tracing::info!("Loaded vocabulary of {} ids from '{}'", vocab.size, path.display());
        tracing::debug!(
            "Special ids: pad={} unk={} cls={} sep={} mask={}",
            vocab.pad_id(),
            vocab.unk_id(),
            vocab.bos_id(),
            vocab.eos_id(),
            vocab.mask_id()
        );
        Ok(vocab)
    }

    /// Build a vocabulary from the contents of a vocabulary file.
    pub fn parse(text: &str) -> Result<Self> {
        let entries = parse_entries(text)?;

        let special = |token: &str| -> Result<u32> {
            entries
                .get(token)
                .copied()
                .ok_or_else(|| anyhow!("Vocabulary is missing special token {token}"))
        };
        let unk_id  = special(UNK_TOKEN)?;
        let bos_id  = special(BOS_TOKEN)?;
        let eos_id  = special(EOS_TOKEN)?;
        let mask_id = special(MASK_TOKEN)?;
        let pad_id  = special(PAD_TOKEN)?;

        let size = entries.values().max().map_or(0, |&id| id as usize + 1);
        let tokenizer = build_tokenizer(&entries)?;

        Ok(Self { tokenizer, size, unk_id, bos_id, eos_id, mask_id, pad_id })
    }

    /// Encode one whitespace-tokenized turn. Unknown tokens map to [UNK].
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenisation error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    /// Number of ids (largest id + 1)
    pub fn size(&self) -> usize { self.size }

    pub fn unk_id(&self)  -> u32 { self.unk_id }
    pub fn bos_id(&self)  -> u32 { self.bos_id }
    pub fn eos_id(&self)  -> u32 { self.eos_id }
    pub fn mask_id(&self) -> u32 { self.mask_id }
    pub fn pad_id(&self)  -> u32 { self.pad_id }
}

fn parse_entries(text: &str) -> Result<HashMap<String, u32>> {
    let mut entries = HashMap::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (token, id) = match line.split_once('\t') {
            Some((token, id)) => {
                let id = id.trim().parse::<u32>().with_context(|| {
                    format!("Line {}: id '{}' is not an integer", line_no + 1, id.trim())
                })?;
                (token.trim(), id)
            }
            None => (line.trim(), line_no as u32),
        };
        if token.is_empty() {
            bail!("Line {}: empty token", line_no + 1);
        }
        entries.insert(token.to_string(), id);
    }
    if entries.is_empty() {
        bail!("Vocabulary is empty");
    }
    Ok(entries)
}

/// Write a HuggingFace tokenizer JSON for a WordLevel model and load it.
fn build_tokenizer(entries: &HashMap<String, u32>) -> Result<Tokenizer> {
    let added_tokens: Vec<serde_json::Value> = SPECIAL_TOKENS
        .iter()
        .filter_map(|&token| entries.get(token).map(|&id| (token, id)))
        .map(|(token, id)| {
            serde_json::json!({
                "id": id, "content": token, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        })
        .collect();

    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": null,
        "pre_tokenizer": { "type": "WhitespaceSplit" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": entries,
            "unk_token": UNK_TOKEN
        }
    });

    Tokenizer::from_str(&tokenizer_json.to_string())
        .map_err(|e| anyhow!("Cannot build tokenizer from vocabulary: {e}"))
}
