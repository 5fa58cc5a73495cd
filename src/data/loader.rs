// ============================================================
// Layer 4 — Dialogue File Loader
// ============================================================
// Reads a tab-separated dialogue corpus:
//
//   turn_1 <TAB> turn_2 <TAB> ... <TAB> response
//
// Every field is pre-tokenized text. The last field is the
// response; all preceding fields are context turns. Blank
// lines are ignored and lines with a single field are skipped
// with a warning.
//
// Reference: Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::domain::dialogue::Dialogue;
use crate::domain::traits::DialogueSource;

/// Loads dialogues from one text file.
pub struct DialogueFileLoader {
    path: PathBuf,
}

impl DialogueFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DialogueSource for DialogueFileLoader {
    fn load_all(&self) -> Result<Vec<Dialogue>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read dialogue file '{}'", self.path.display()))?;
        let dialogues = parse_dialogues(&text);
        let tokens: usize = dialogues.iter().map(Dialogue::token_count).sum();
        tracing::info!(
            "Loaded {} dialogues ({} words) from '{}'",
            dialogues.len(),
            tokens,
            self.path.display()
        );
        Ok(dialogues)
    }
}

/// Parse every line of a corpus, skipping lines without a response.
pub fn parse_dialogues(text: &str) -> Vec<Dialogue> {
    let mut skipped = 0usize;
    let dialogues: Vec<Dialogue> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(line_no, line)| {
            let parsed = parse_line(line);
            if parsed.is_none() {
                tracing::debug!("Skipping line {}: no response field", line_no + 1);
                skipped += 1;
            }
            parsed
        })
        .collect();

    if skipped > 0 {
        tracing::warn!("Skipped {} malformed dialogue lines", skipped);
    }
    dialogues
}

fn parse_line(line: &str) -> Option<Dialogue> {
    let mut fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
    if fields.len() < 2 {
        return None;
    }
    let response = fields.pop()?.trim();
    let context = fields.into_iter().map(str::trim);
    Some(Dialogue::new(context, response))
}
