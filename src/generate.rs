//! Dataset generation pipeline.
//!
//! ```text
//! [dump command] → load corpus → chunk → embed (batched) → publish
//! ```
//!
//! Any embedding failure aborts the run before anything is written, so a
//! published dataset is either fully embedded or was deliberately built
//! without embeddings.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use wikiqa_core::chunk::{chunk_pages, ChunkOptions};
use wikiqa_core::embedding::EmbeddingProvider;
use wikiqa_core::models::{Dataset, DatasetMetadata, Usage};
use wikiqa_core::sanitize::SanitizeOptions;
use wikiqa_core::tokenizer::Tokenizer;

use crate::config::Config;
use crate::corpus::{load_corpus, Corpus};
use crate::dataset::{publish_dataset, validate_dataset_id};
use crate::error::GenerationError;
use crate::progress::{GenerationEvent, GenerationProgress};

/// Inputs of one generation run.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub dataset_root: PathBuf,
    /// Dataset id (directory name) to publish.
    pub output: String,
    pub corpus_path: PathBuf,
    pub escape: Option<char>,
    /// Run before loading the corpus when set.
    pub dump_command: Option<Vec<String>>,
    pub chunk: ChunkOptions,
    pub batch_size: usize,
}

impl GenerateOptions {
    pub fn from_config(config: &Config, output: &str) -> Self {
        Self {
            dataset_root: config.dataset.root.clone(),
            output: output.to_string(),
            corpus_path: config.corpus.path.clone(),
            escape: config.corpus.escape,
            dump_command: None,
            chunk: ChunkOptions {
                max_tokens: config.chunking.max_tokens,
                sanitize: SanitizeOptions {
                    flatten_wikilinks: config.chunking.flatten_wikilinks,
                },
            },
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Counters of a generation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationReport {
    pub pages_in: usize,
    pub pages_skipped: usize,
    pub sentences_dropped: usize,
    pub passages: usize,
    /// Total usage of every embedding call made for the dataset.
    pub embedding_usage: Usage,
}

/// A dataset built in memory, not yet published.
#[derive(Debug, Clone)]
pub struct BuiltDataset {
    pub dataset: Dataset,
    pub report: GenerationReport,
}

/// A published dataset.
#[derive(Debug, Clone)]
pub struct Generation {
    pub dataset: Dataset,
    pub path: PathBuf,
    pub report: GenerationReport,
}

/// Chunks a corpus and optionally embeds every passage.
pub struct DatasetBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    options: ChunkOptions,
    batch_size: usize,
}

impl DatasetBuilder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, options: ChunkOptions) -> Self {
        Self {
            tokenizer,
            embedder: None,
            options,
            batch_size: 64,
        }
    }

    /// Embed passages with `embedder`, `batch_size` texts per call.
    pub fn with_embeddings(mut self, embedder: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        self.embedder = Some(embedder);
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn build(
        &self,
        id: &str,
        corpus: &Corpus,
        progress: &dyn GenerationProgress,
    ) -> Result<BuiltDataset, GenerationError> {
        let chunked = chunk_pages(&corpus.pages, &self.options, self.tokenizer.as_ref());
        info!(
            pages = chunked.pages_in,
            skipped = chunked.pages_skipped,
            passages = chunked.passages.len(),
            "chunked corpus"
        );
        if chunked.sentences_dropped > 0 {
            warn!(
                dropped = chunked.sentences_dropped,
                max_tokens = self.options.max_tokens,
                "dropped sentences longer than the passage ceiling"
            );
        }
        progress.report(GenerationEvent::Chunked {
            pages: chunked.pages_in as u64,
            passages: chunked.passages.len() as u64,
        });

        let mut passages = chunked.passages;
        let mut usage = Usage::default();

        if let Some(embedder) = &self.embedder {
            let total = passages.len();
            for start in (0..total).step_by(self.batch_size) {
                let end = (start + self.batch_size).min(total);
                let texts: Vec<String> = passages[start..end]
                    .iter()
                    .map(|p| p.content.clone())
                    .collect();

                let batch = match embedder.embed_texts(&texts).await {
                    Ok(batch) => batch,
                    Err(source) => {
                        error!(start, error = %format!("{:#}", source), "embedding batch failed");
                        return Err(GenerationError::Embedding { chunk: start, source });
                    }
                };
                if batch.vectors.len() != texts.len() {
                    return Err(GenerationError::Embedding {
                        chunk: start,
                        source: anyhow::anyhow!(
                            "provider returned {} vectors for {} passages",
                            batch.vectors.len(),
                            texts.len()
                        ),
                    });
                }

                let dims = embedder.dims();
                for (i, vector) in batch.vectors.iter().enumerate() {
                    let reason = if vector.len() != dims {
                        format!("vector has {} dimensions, expected {}", vector.len(), dims)
                    } else if vector.iter().any(|x| !x.is_finite()) {
                        "vector has non-finite components".to_string()
                    } else {
                        continue;
                    };
                    error!(passage = start + i, %reason, "invalid embedding");
                    return Err(GenerationError::Embedding {
                        chunk: start,
                        source: anyhow::anyhow!("passage {}: {}", start + i, reason),
                    });
                }

                for (passage, vector) in passages[start..end].iter_mut().zip(batch.vectors) {
                    passage.embedding = Some(vector);
                }
                usage = usage.add(batch.usage);
                debug!(start, end, "embedded batch");
                progress.report(GenerationEvent::Embedding {
                    n: end as u64,
                    total: total as u64,
                });
            }
            info!(
                passages = total,
                tokens = usage.total_tokens,
                model = embedder.model_name(),
                "embedded passages"
            );
        }

        let report = GenerationReport {
            pages_in: chunked.pages_in,
            pages_skipped: chunked.pages_skipped,
            sentences_dropped: chunked.sentences_dropped,
            passages: passages.len(),
            embedding_usage: usage,
        };

        let dataset = Dataset {
            id: id.to_string(),
            metadata: DatasetMetadata {
                source: corpus.name.clone(),
                generated_at: Utc::now(),
                max_chunk_tokens: self.options.max_tokens,
                tokenizer: self.tokenizer.name().to_string(),
                embedding_model: self.embedder.as_ref().map(|e| e.model_name().to_string()),
                passages: passages.len(),
            },
            passages,
        };

        Ok(BuiltDataset { dataset, report })
    }
}

/// Run the configured dump command, failing on a non-zero exit.
pub async fn run_dump_command(command: &[String]) -> Result<(), GenerationError> {
    let Some((program, args)) = command.split_first() else {
        return Err(GenerationError::DumpFailed("dump_command is empty".to_string()));
    };

    info!(program = %program, "refreshing corpus dump");
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| GenerationError::DumpFailed(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GenerationError::DumpFailed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Refresh (optionally), load and build, without publishing.
pub async fn build_dataset(
    options: &GenerateOptions,
    builder: &DatasetBuilder,
    progress: &dyn GenerationProgress,
) -> Result<BuiltDataset, GenerationError> {
    validate_dataset_id(&options.output).map_err(GenerationError::Publish)?;

    if let Some(command) = &options.dump_command {
        run_dump_command(command).await?;
    }

    let corpus = load_corpus(&options.corpus_path, options.escape).map_err(GenerationError::Corpus)?;
    progress.report(GenerationEvent::Loaded {
        corpus: corpus.name.clone(),
        pages: corpus.pages.len() as u64,
    });

    builder.build(&options.output, &corpus, progress).await
}

/// Publish a built dataset under `options.output`.
pub fn publish(
    options: &GenerateOptions,
    built: BuiltDataset,
    progress: &dyn GenerationProgress,
) -> Result<Generation, GenerationError> {
    let path = publish_dataset(&options.dataset_root, &built.dataset, Some(&options.corpus_path))
        .map_err(GenerationError::Publish)?;
    progress.report(GenerationEvent::Published {
        dataset: built.dataset.id.clone(),
        passages: built.dataset.passages.len() as u64,
    });
    Ok(Generation {
        dataset: built.dataset,
        path,
        report: built.report,
    })
}

/// Full run: corpus → build → publish.
pub async fn generate_dataset(
    options: &GenerateOptions,
    builder: &DatasetBuilder,
    progress: &dyn GenerationProgress,
) -> Result<Generation, GenerationError> {
    let built = build_dataset(options, builder, progress).await?;
    publish(options, built, progress)
}
