//! Dataset persistence.
//!
//! A dataset lives in its own directory under `[dataset] root`:
//!
//! ```text
//! <root>/<id>/
//!   passages.csv    page_title,content,n_tokens,embedding
//!   METADATA.txt    Key: value lines
//!   <corpus dump>   copy of the source dump
//! ```
//!
//! The `embedding` column holds a literal array such as `[0.1,-2.5]`, or
//! is empty when the dataset was generated without embeddings.
//!
//! Datasets are published by writing into a hidden sibling directory and
//! renaming it into place, so a reader never observes a half-written
//! dataset under its final name.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;
use wikiqa_core::embedding::{text_to_vec, vec_to_text};
use wikiqa_core::models::{Dataset, DatasetMetadata, Passage};
use wikiqa_core::tokenizer::Tokenizer;

use crate::error::DatasetError;

pub const PASSAGES_FILE: &str = "passages.csv";
pub const METADATA_FILE: &str = "METADATA.txt";

const COLUMNS: [&str; 4] = ["page_title", "content", "n_tokens", "embedding"];

/// Write `dataset` into `dir` (created if needed).
///
/// When `corpus` is given, the dump is copied beside the passage table
/// under its own file name.
pub fn write_dataset(dir: &Path, dataset: &Dataset, corpus: Option<&Path>) -> Result<(), DatasetError> {
    fs::create_dir_all(dir).map_err(|e| DatasetError::io(dir, e))?;

    let passages_path = dir.join(PASSAGES_FILE);
    let mut writer =
        csv::Writer::from_path(&passages_path).map_err(|e| DatasetError::csv(&passages_path, e))?;
    writer
        .write_record(COLUMNS)
        .map_err(|e| DatasetError::csv(&passages_path, e))?;
    for (i, passage) in dataset.passages.iter().enumerate() {
        let n_tokens = passage.n_tokens.to_string();
        let embedding = match passage.embedding.as_deref() {
            Some(vector) => vec_to_text(vector).map_err(|e| DatasetError::MalformedRow {
                row: i + 1,
                reason: e.to_string(),
            })?,
            None => String::new(),
        };
        writer
            .write_record([
                passage.page_title.as_str(),
                passage.content.as_str(),
                n_tokens.as_str(),
                embedding.as_str(),
            ])
            .map_err(|e| DatasetError::csv(&passages_path, e))?;
    }
    writer
        .flush()
        .map_err(|e| DatasetError::io(&passages_path, e))?;

    let metadata_path = dir.join(METADATA_FILE);
    fs::write(&metadata_path, dataset.metadata.to_text())
        .map_err(|e| DatasetError::io(&metadata_path, e))?;

    if let Some(corpus) = corpus {
        let name = corpus
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.is_empty() || name == PASSAGES_FILE || name == METADATA_FILE {
            warn!(corpus = %corpus.display(), "not copying corpus dump: file name collides with dataset files");
        } else {
            let target = dir.join(&name);
            fs::copy(corpus, &target).map_err(|e| DatasetError::io(corpus, e))?;
        }
    }

    Ok(())
}

/// Check that `id` can name a dataset directory.
pub fn validate_dataset_id(id: &str) -> Result<(), DatasetError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
        && id != "..";
    if valid {
        Ok(())
    } else {
        Err(DatasetError::io(
            id,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "dataset id must be a plain, non-hidden directory name",
            ),
        ))
    }
}

/// Atomically publish `dataset` as `<root>/<dataset.id>`, replacing any
/// previous dataset with the same id. Returns the final directory.
pub fn publish_dataset(root: &Path, dataset: &Dataset, corpus: Option<&Path>) -> Result<PathBuf, DatasetError> {
    validate_dataset_id(&dataset.id)?;
    fs::create_dir_all(root).map_err(|e| DatasetError::io(root, e))?;

    let target = root.join(&dataset.id);
    let staging = root.join(format!(".{}.tmp-{}", dataset.id, Uuid::new_v4()));

    if let Err(e) = write_dataset(&staging, dataset, corpus) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    let previous = if target.exists() {
        let old = root.join(format!(".{}.old-{}", dataset.id, Uuid::new_v4()));
        if let Err(e) = fs::rename(&target, &old) {
            let _ = fs::remove_dir_all(&staging);
            return Err(DatasetError::io(&target, e));
        }
        Some(old)
    } else {
        None
    };

    if let Err(e) = fs::rename(&staging, &target) {
        if let Some(old) = &previous {
            let _ = fs::rename(old, &target);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(DatasetError::io(&target, e));
    }

    if let Some(old) = previous {
        if let Err(e) = fs::remove_dir_all(&old) {
            warn!(path = %old.display(), error = %e, "failed to remove replaced dataset");
        }
    }

    info!(
        dataset = %dataset.id,
        passages = dataset.passages.len(),
        path = %target.display(),
        "published dataset"
    );
    Ok(target)
}

/// Load `<root>/<id>`.
pub fn load_dataset(root: &Path, id: &str) -> Result<Dataset, DatasetError> {
    let dir = root.join(id);

    let metadata_path = dir.join(METADATA_FILE);
    if !metadata_path.is_file() {
        return Err(DatasetError::MissingMetadata(metadata_path));
    }
    let text = fs::read_to_string(&metadata_path).map_err(|e| DatasetError::io(&metadata_path, e))?;
    let metadata = DatasetMetadata::parse(&text).map_err(DatasetError::MalformedMetadata)?;

    let passages = read_passages(&dir.join(PASSAGES_FILE))?;
    if metadata.passages != passages.len() {
        warn!(
            dataset = id,
            recorded = metadata.passages,
            actual = passages.len(),
            "passage count differs from metadata"
        );
    }

    let dataset = Dataset {
        id: id.to_string(),
        metadata,
        passages,
    };
    debug!(
        dataset = id,
        passages = dataset.passages.len(),
        embedded = dataset.embedded_count(),
        "loaded dataset"
    );
    Ok(dataset)
}

fn read_passages(path: &Path) -> Result<Vec<Passage>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| DatasetError::csv(path, e))?;

    let headers = reader.headers().map_err(|e| DatasetError::csv(path, e))?.clone();
    let mut idx = [0usize; 4];
    let mut missing = Vec::new();
    for (slot, name) in idx.iter_mut().zip(COLUMNS) {
        match headers.iter().position(|h| h.trim() == name) {
            Some(i) => *slot = i,
            None => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(DatasetError::MissingColumns {
            path: path.to_path_buf(),
            missing,
        });
    }
    let [title_idx, content_idx, tokens_idx, embedding_idx] = idx;

    let mut passages = Vec::new();
    let mut dims: Option<usize> = None;

    for (i, record) in reader.records().enumerate() {
        let row = i + 1;
        let record = record.map_err(|e| DatasetError::csv(path, e))?;
        let field = |idx: usize| {
            record.get(idx).ok_or_else(|| DatasetError::MalformedRow {
                row,
                reason: format!("missing field {}", idx + 1),
            })
        };

        let n_tokens = field(tokens_idx)?
            .trim()
            .parse::<usize>()
            .map_err(|e| DatasetError::MalformedRow {
                row,
                reason: format!("invalid n_tokens: {}", e),
            })?;

        let raw_embedding = field(embedding_idx)?.trim();
        let embedding = if raw_embedding.is_empty() {
            None
        } else {
            let vec = text_to_vec(raw_embedding).map_err(|e| DatasetError::MalformedRow {
                row,
                reason: e.to_string(),
            })?;
            match dims {
                None => dims = Some(vec.len()),
                Some(d) if d != vec.len() => {
                    return Err(DatasetError::MalformedRow {
                        row,
                        reason: format!("embedding has {} dimensions, expected {}", vec.len(), d),
                    });
                }
                Some(_) => {}
            }
            Some(vec)
        };

        passages.push(Passage {
            page_title: field(title_idx)?.to_string(),
            content: field(content_idx)?.to_string(),
            n_tokens,
            embedding,
        });
    }

    Ok(passages)
}

/// Check that a dataset can be activated for retrieval with `tokenizer`.
pub fn ensure_servable(dataset: &Dataset, tokenizer: &dyn Tokenizer) -> Result<(), DatasetError> {
    if !dataset.is_fully_embedded() {
        return Err(DatasetError::NotEmbedded(dataset.id.clone()));
    }
    if dataset.metadata.tokenizer != tokenizer.name() {
        return Err(DatasetError::TokenizerMismatch {
            dataset: dataset.metadata.tokenizer.clone(),
            configured: tokenizer.name().to_string(),
        });
    }
    Ok(())
}

/// Re-tokenize every passage and compare with its stored `n_tokens`.
///
/// Returns every mismatch found; an empty list means the table is consistent.
pub fn verify_token_counts(dataset: &Dataset, tokenizer: &dyn Tokenizer) -> Vec<DatasetError> {
    dataset
        .passages
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let actual = tokenizer.count_tokens(&p.content);
            (actual != p.n_tokens).then_some(DatasetError::InconsistentTokens {
                row: i + 1,
                stored: p.n_tokens,
                actual,
            })
        })
        .collect()
}

/// Names of the dataset directories under `root`, sorted.
pub fn list_datasets(root: &Path) -> Result<Vec<String>, DatasetError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DatasetError::io(root, e)),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::io(root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') && entry.path().join(METADATA_FILE).is_file() {
            ids.push(name);
        }
    }
    ids.sort();
    Ok(ids)
}
