//! Question validation, ranking and context packing against the active
//! dataset.

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tracing::{debug, error, warn};
use wikiqa_core::embedding::EmbeddingProvider;
use wikiqa_core::models::{Dataset, Usage};
use wikiqa_core::search::{rank_and_pack, SelectedPassage};
use wikiqa_core::tokenizer::Tokenizer;

use crate::active::ActiveDataset;
use crate::dataset::ensure_servable;
use crate::error::{AskError, DatasetError, Rejection};

/// Packed context for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    /// Accepted passage contents joined with `"\n\n###\n\n"`; empty when nothing fit.
    pub context: String,
    pub passages: Vec<SelectedPassage>,
    pub tokens_used: usize,
    /// Usage of the question embedding call.
    pub usage: Usage,
    /// Dataset the context was drawn from.
    pub dataset_id: String,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

pub struct Retriever {
    active: ActiveDataset,
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_question_tokens: usize,
}

impl Retriever {
    pub fn new(
        active: ActiveDataset,
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_question_tokens: usize,
    ) -> Self {
        Self {
            active,
            tokenizer,
            embedder,
            max_question_tokens,
        }
    }

    pub fn active(&self) -> &ActiveDataset {
        &self.active
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Trim `question` and check it is non-empty and within the token limit.
    pub fn validate_question(&self, question: &str) -> Result<String, Rejection> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Rejection::EmptyQuestion);
        }
        let tokens = self.tokenizer.count_tokens(question);
        if tokens > self.max_question_tokens {
            return Err(Rejection::QuestionTooLong {
                tokens,
                limit: self.max_question_tokens,
            });
        }
        Ok(question.to_string())
    }

    /// Embed `question` and pack the nearest passages of the active
    /// dataset into `token_budget` tokens.
    pub async fn rank_and_pack(&self, question: &str, token_budget: usize) -> Result<RetrievedContext, AskError> {
        let question = self.validate_question(question)?;
        let dataset = self.active.snapshot();

        let embedded = self.embedder.embed(&question).await.map_err(|e| {
            error!(error = %format!("{:#}", e), "question embedding failed");
            AskError::Embedding(e)
        })?;

        if let Some(dims) = dataset_dims(&dataset) {
            if dims != embedded.vector.len() {
                return Err(AskError::Embedding(anyhow!(
                    "question embedding has {} dimensions, dataset '{}' has {}",
                    embedded.vector.len(),
                    dataset.id,
                    dims
                )));
            }
        }

        let packed = rank_and_pack(&dataset.passages, &embedded.vector, token_budget);
        if packed.is_empty() {
            warn!(
                dataset = %dataset.id,
                token_budget,
                candidates = packed.candidates,
                "no passage fits the context budget"
            );
        } else {
            debug!(
                dataset = %dataset.id,
                selected = packed.selected.len(),
                tokens = packed.tokens_used,
                "packed context"
            );
        }

        Ok(RetrievedContext {
            context: packed.context,
            passages: packed.selected,
            tokens_used: packed.tokens_used,
            usage: embedded.usage,
            dataset_id: dataset.id.clone(),
        })
    }

    /// Make `dataset` the active one if it can be served with this
    /// retriever's tokenizer.
    pub fn activate(&self, dataset: Dataset) -> Result<Arc<Dataset>, DatasetError> {
        ensure_servable(&dataset, self.tokenizer.as_ref())?;
        Ok(self.active.replace(dataset))
    }
}

fn dataset_dims(dataset: &Dataset) -> Option<usize> {
    dataset
        .passages
        .iter()
        .find_map(|p| p.embedding.as_ref().map(Vec::len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use wikiqa_core::embedding::EmbeddingBatch;
    use wikiqa_core::models::{DatasetMetadata, Passage};
    use wikiqa_core::tokenizer::WhitespaceTokenizer;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<EmbeddingBatch> {
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|_| self.0.clone()).collect(),
                usage: Usage {
                    prompt_tokens: 3,
                    total_tokens: 3,
                },
            })
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, _texts: &[String]) -> anyhow::Result<EmbeddingBatch> {
            anyhow::bail!("503 service unavailable")
        }
    }

    fn ships() -> Dataset {
        Dataset {
            id: "ships".to_string(),
            metadata: DatasetMetadata {
                source: "dump.csv".to_string(),
                generated_at: Utc::now(),
                max_chunk_tokens: 20,
                tokenizer: "whitespace".to_string(),
                embedding_model: Some("fixed".to_string()),
                passages: 2,
            },
            passages: vec![
                Passage {
                    page_title: "Theia".to_string(),
                    content: "theia. a light cruiser with 500 shield.".to_string(),
                    n_tokens: 10,
                    embedding: Some(vec![1.0, 0.0]),
                },
                Passage {
                    page_title: "Deity".to_string(),
                    content: "deity. a battleship with 2000 shield.".to_string(),
                    n_tokens: 11,
                    embedding: Some(vec![0.0, 1.0]),
                },
            ],
        }
    }

    fn retriever(embedder: Arc<dyn EmbeddingProvider>) -> Retriever {
        Retriever::new(
            ActiveDataset::new(ships()),
            Arc::new(WhitespaceTokenizer),
            embedder,
            5,
        )
    }

    #[test]
    fn test_validate_question() {
        let r = retriever(Arc::new(FixedEmbedder(vec![1.0, 0.0])));
        assert_eq!(r.validate_question("  what is the theia?  ").unwrap(), "what is the theia?");
        assert_eq!(r.validate_question(" \n "), Err(Rejection::EmptyQuestion));
        assert_eq!(
            r.validate_question("one two three four five six"),
            Err(Rejection::QuestionTooLong { tokens: 6, limit: 5 })
        );
    }

    #[tokio::test]
    async fn test_rank_and_pack_nearest() {
        let r = retriever(Arc::new(FixedEmbedder(vec![0.9, 0.1])));
        let ctx = r.rank_and_pack("what is the theia?", 20).await.unwrap();
        assert_eq!(ctx.context, "theia. a light cruiser with 500 shield.");
        assert_eq!(ctx.passages.len(), 1);
        assert_eq!(ctx.tokens_used, 14);
        assert_eq!(ctx.usage.total_tokens, 3);
        assert_eq!(ctx.dataset_id, "ships");
    }

    #[tokio::test]
    async fn test_zero_budget_is_empty_context() {
        let r = retriever(Arc::new(FixedEmbedder(vec![0.9, 0.1])));
        let ctx = r.rank_and_pack("what is the theia?", 0).await.unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.context, "");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_an_error() {
        let r = retriever(Arc::new(FailingEmbedder));
        let err = r.rank_and_pack("what is the theia?", 100).await.unwrap_err();
        assert!(matches!(err, AskError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_rejection_skips_embedding() {
        let r = retriever(Arc::new(FailingEmbedder));
        let err = r.rank_and_pack("   ", 100).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::EmptyQuestion));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let r = retriever(Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])));
        assert!(matches!(
            r.rank_and_pack("theia", 100).await,
            Err(AskError::Embedding(_))
        ));
    }

    #[test]
    fn test_activate_requires_servable_dataset() {
        let r = retriever(Arc::new(FixedEmbedder(vec![1.0, 0.0])));

        let mut unembedded = ships();
        unembedded.id = "plain".to_string();
        unembedded.passages[0].embedding = None;
        assert!(matches!(r.activate(unembedded), Err(DatasetError::NotEmbedded(_))));
        assert_eq!(r.active().id(), "ships");

        let mut next = ships();
        next.id = "ships-v2".to_string();
        let previous = r.activate(next).unwrap();
        assert_eq!(previous.id, "ships");
        assert_eq!(r.active().id(), "ships-v2");
    }
}
