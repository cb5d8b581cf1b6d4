//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that embedding backends
//! implement, plus pure helpers for distance computation and for the
//! textual array form used in the dataset's `embedding` column.
//!
//! Concrete providers (OpenAI, disabled) live in the `wikiqa` app crate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Usage;

/// One embedded text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub usage: Usage,
}

/// Vectors for a batch of texts, in input order, with the batch's usage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub usage: Usage,
}

/// An external embedding provider.
///
/// Failures are returned as errors and never replaced by empty vectors;
/// retry policy belongs to the caller.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts. Must return exactly one vector per text.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedded> {
        let batch = self.embed_texts(&[text.to_string()]).await?;
        let vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;
        Ok(Embedded {
            vector,
            usage: batch.usage,
        })
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance: `1 - cosine_similarity`. Lower is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Render a vector as a literal array, e.g. `[1.0,-2.5]`.
///
/// # Example
///
/// ```rust
/// use wikiqa_core::embedding::{text_to_vec, vec_to_text};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let text = vec_to_text(&v).unwrap();
/// assert_eq!(text, "[1.0,-2.5,3.125]");
/// assert_eq!(text_to_vec(&text).unwrap(), v);
/// ```
///
/// Fails on NaN or infinite components, which have no array literal.
pub fn vec_to_text(vec: &[f32]) -> Result<String> {
    if let Some(i) = vec.iter().position(|x| !x.is_finite()) {
        return Err(anyhow!("embedding component {} is not finite: {}", i, vec[i]));
    }
    // serde_json writes the shortest representation that reads back exactly.
    serde_json::to_string(vec).map_err(|e| anyhow!("cannot serialize embedding: {}", e))
}

/// Parse a literal array written by [`vec_to_text`] or by Python's
/// `str(list)` (`[0.1, -2.5]`).
pub fn text_to_vec(text: &str) -> Result<Vec<f32>> {
    let vec: Vec<f32> = serde_json::from_str(text.trim())
        .map_err(|e| anyhow!("invalid embedding array: {}", e))?;
    Ok(vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingBatch> {
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect(),
                usage: Usage {
                    prompt_tokens: texts.len() as u32,
                    total_tokens: texts.len() as u32,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_embed_single_uses_batch() {
        let e = FixedProvider.embed("abc").await.unwrap();
        assert_eq!(e.vector, vec![3.0, 1.0]);
        assert_eq!(e.usage.total_tokens, 1);
    }

    #[test]
    fn test_vec_text_roundtrip_exact() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, 0.123_456_78, 1e-8];
        let restored = text_to_vec(&vec_to_text(&vec).unwrap()).unwrap();
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_vec_to_text_rejects_non_finite() {
        assert!(vec_to_text(&[1.0, f32::NAN]).is_err());
        assert!(vec_to_text(&[f32::INFINITY]).is_err());
        assert!(vec_to_text(&[f32::NEG_INFINITY, 0.0]).is_err());
    }

    #[test]
    fn test_text_to_vec_accepts_spaced_lists() {
        assert_eq!(text_to_vec(" [0.5, -1, 2.25] ").unwrap(), vec![0.5, -1.0, 2.25]);
    }

    #[test]
    fn test_text_to_vec_rejects_garbage() {
        assert!(text_to_vec("not an array").is_err());
        assert!(text_to_vec("").is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
