//! Tokenizer abstraction.
//!
//! Every token budget in wikiqa (the per-passage ceiling, the context
//! budget, the question ceiling) is measured with a [`Tokenizer`]. The
//! same tokenizer must be used to build a dataset and to query it; the
//! tokenizer name is recorded in the dataset metadata so the application
//! can refuse a mismatch.

/// Counts tokens in text.
pub trait Tokenizer: Send + Sync {
    /// Stable identifier recorded in dataset metadata (e.g. `"cl100k_base"`).
    fn name(&self) -> &str;
    /// Number of tokens `text` encodes to.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Counts whitespace-separated words.
///
/// Not a model tokenizer. Useful for structural-only dataset builds and
/// for deterministic tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
