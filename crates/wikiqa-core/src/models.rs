//! Core data models shared by the chunker and the retriever.
//!
//! A [`Page`] is read once from a corpus dump, turned into one or more
//! [`Passage`]s by the chunker, and the passages are frozen into a
//! [`Dataset`] snapshot together with its [`DatasetMetadata`].

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw corpus record: one wiki page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page title, unique within a corpus snapshot.
    pub title: String,
    /// Raw markup content.
    pub content: String,
}

impl Page {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// The unit of retrieval.
///
/// The first passage of a page starts with the normalized page title
/// followed by `". "`; later passages of a split page continue its
/// sentence sequence. `n_tokens` is the token count of exactly `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Title of the originating page. Not unique across passages.
    pub page_title: String,
    /// Sanitized, title-prefixed, token-bounded text.
    pub content: String,
    /// Token count of `content` under the dataset's tokenizer.
    pub n_tokens: usize,
    /// Embedding vector, absent when the dataset was built without embeddings.
    pub embedding: Option<Vec<f32>>,
}

/// Token usage reported by a provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Sum two usage records, saturating at `u32::MAX`.
    pub fn add(self, other: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

/// Descriptive record stored beside a dataset's passage table.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    /// File name of the corpus dump the dataset was built from.
    pub source: String,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// The per-passage token ceiling `T` used by the chunker.
    pub max_chunk_tokens: usize,
    /// Tokenizer name used for every `n_tokens` in the table.
    pub tokenizer: String,
    /// Embedding model, if passages were embedded.
    pub embedding_model: Option<String>,
    /// Number of passages in the table.
    pub passages: usize,
}

impl DatasetMetadata {
    /// Render as `Key: value` lines.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Dataset: {}\n", self.source));
        out.push_str(&format!("Timestamp: {}\n", self.generated_at.to_rfc3339()));
        out.push_str(&format!("Max_len: {}\n", self.max_chunk_tokens));
        out.push_str(&format!("Tokenizer: {}\n", self.tokenizer));
        if let Some(model) = &self.embedding_model {
            out.push_str(&format!("Embedding_model: {}\n", model));
        }
        out.push_str(&format!("Passages: {}\n", self.passages));
        out
    }

    /// Parse the `Key: value` form written by [`to_text`](Self::to_text).
    ///
    /// `Dataset`, `Timestamp` and `Max_len` are required. Unknown keys
    /// are ignored. A missing `Tokenizer` defaults to `cl100k_base`,
    /// which every dataset predating the key was built with.
    pub fn parse(text: &str) -> Result<Self> {
        let mut source = None;
        let mut generated_at = None;
        let mut max_chunk_tokens = None;
        let mut tokenizer = None;
        let mut embedding_model = None;
        let mut passages = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("metadata line is not `Key: value`: {}", line))?;
            let value = value.trim();
            match key.trim() {
                "Dataset" => source = Some(value.to_string()),
                "Timestamp" => {
                    let ts = DateTime::parse_from_rfc3339(value)
                        .map_err(|e| anyhow!("invalid Timestamp '{}': {}", value, e))?;
                    generated_at = Some(ts.with_timezone(&Utc));
                }
                "Max_len" => {
                    max_chunk_tokens = Some(
                        value
                            .parse::<usize>()
                            .map_err(|e| anyhow!("invalid Max_len '{}': {}", value, e))?,
                    )
                }
                "Tokenizer" => tokenizer = Some(value.to_string()),
                "Embedding_model" => embedding_model = Some(value.to_string()),
                "Passages" => {
                    passages = Some(
                        value
                            .parse::<usize>()
                            .map_err(|e| anyhow!("invalid Passages '{}': {}", value, e))?,
                    )
                }
                _ => {}
            }
        }

        let Some(source) = source else {
            bail!("metadata is missing the Dataset key");
        };
        let Some(generated_at) = generated_at else {
            bail!("metadata is missing the Timestamp key");
        };
        let Some(max_chunk_tokens) = max_chunk_tokens else {
            bail!("metadata is missing the Max_len key");
        };

        Ok(Self {
            source,
            generated_at,
            max_chunk_tokens,
            tokenizer: tokenizer.unwrap_or_else(|| "cl100k_base".to_string()),
            embedding_model,
            passages: passages.unwrap_or(0),
        })
    }
}

/// An immutable, named snapshot of passages plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Dataset identifier (its directory name on disk).
    pub id: String,
    pub metadata: DatasetMetadata,
    /// Passages in retrieval tie-break order.
    pub passages: Vec<Passage>,
}

impl Dataset {
    /// Number of passages carrying an embedding.
    pub fn embedded_count(&self) -> usize {
        self.passages
            .iter()
            .filter(|p| p.embedding.is_some())
            .count()
    }

    /// True when every passage has an embedding and there is at least one.
    pub fn is_fully_embedded(&self) -> bool {
        !self.passages.is_empty() && self.embedded_count() == self.passages.len()
    }
}
