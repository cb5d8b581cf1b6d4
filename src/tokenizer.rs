//! Tokenizer backends.
//!
//! Token counts must match the completion model's tokenizer, so the
//! production backends are the OpenAI BPE encodings shipped with
//! `tiktoken-rs`. The `whitespace` backend from `wikiqa-core` is kept for
//! structural-only builds and tests.

use std::sync::Arc;

use anyhow::{bail, Result};
use tiktoken_rs::CoreBPE;
use wikiqa_core::tokenizer::{Tokenizer, WhitespaceTokenizer};

/// A tiktoken BPE encoding.
pub struct TiktokenTokenizer {
    name: String,
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// Load a named encoding (`cl100k_base` or `o200k_base`).
    pub fn new(name: &str) -> Result<Self> {
        let bpe = match name {
            "cl100k_base" => tiktoken_rs::cl100k_base()?,
            "o200k_base" => tiktoken_rs::o200k_base()?,
            other => bail!("Unknown tiktoken encoding: {}", other),
        };
        Ok(Self {
            name: name.to_string(),
            bpe,
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Create the tokenizer named in `[chunking] tokenizer`.
pub fn create_tokenizer(name: &str) -> Result<Arc<dyn Tokenizer>> {
    match name {
        "whitespace" => Ok(Arc::new(WhitespaceTokenizer)),
        "cl100k_base" | "o200k_base" => Ok(Arc::new(TiktokenTokenizer::new(name)?)),
        other => bail!("Unknown tokenizer: {}", other),
    }
}
