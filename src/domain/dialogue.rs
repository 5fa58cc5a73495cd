// ============================================================
// Layer 3 — Dialogue Domain Type
// ============================================================
// One training example for response generation:
//   - an ordered list of context turns (oldest first)
//   - the response the model must learn to produce
//
// Turns are pre-tokenized text: tokens separated by whitespace.
//
// Example:
//   context:  ["hi there", "hello , how are you ?"]
//   response: "fine thanks"

use serde::{Deserialize, Serialize};

/// A dialogue history and the response that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    /// Context turns, oldest first
    pub context: Vec<String>,

    /// The turn to be generated
    pub response: String,
}

impl Dialogue {
    /// Create a new Dialogue from any iterable of turns.
    pub fn new<I, S>(context: I, response: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            context:  context.into_iter().map(Into::into).collect(),
            response: response.into(),
        }
    }

    /// Number of whitespace tokens across context and response
    pub fn token_count(&self) -> usize {
        self.context
            .iter()
            .chain(std::iter::once(&self.response))
            .map(|turn| turn.split_whitespace().count())
            .sum()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count_spans_all_turns() {
        let d = Dialogue::new(["a b", "c"], "d e f");
        assert_eq!(d.token_count(), 6);
        assert_eq!(d.context.len(), 2);
    }
}
