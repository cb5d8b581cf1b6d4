//! Error taxonomy.
//!
//! Provider failures and input rejections are distinct variants so that
//! callers can tell "the question was declined" apart from "a dependency
//! failed". None of them is ever turned into an empty result.

use std::path::PathBuf;

use thiserror::Error;

/// Why a question was declined before any retrieval happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("question is {tokens} tokens, the limit is {limit}")]
    QuestionTooLong { tokens: usize, limit: usize },
    #[error("question was flagged by moderation")]
    Flagged,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure of the question-answering path.
#[derive(Debug, Error)]
pub enum AskError {
    #[error("request declined: {0}")]
    Rejected(#[from] Rejection),
    #[error("embedding provider failed: {0:#}")]
    Embedding(#[source] anyhow::Error),
    #[error("moderation provider failed: {0:#}")]
    Moderation(#[source] anyhow::Error),
    #[error("completion provider failed: {0:#}")]
    Completion(#[source] anyhow::Error),
}

impl AskError {
    /// The rejection, when the request was declined rather than failed.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AskError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

/// Failure reading, writing or validating a dataset or corpus file.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} is missing required column(s): {}", .missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },
    #[error("row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("dataset metadata not found at {0}")]
    MissingMetadata(PathBuf),
    #[error("malformed dataset metadata: {0:#}")]
    MalformedMetadata(#[source] anyhow::Error),
    #[error("dataset '{0}' has no passages or passages without embeddings")]
    NotEmbedded(String),
    #[error("dataset was built with tokenizer '{dataset}', configured tokenizer is '{configured}'")]
    TokenizerMismatch { dataset: String, configured: String },
    #[error("row {row}: stored n_tokens {stored} but content has {actual} tokens")]
    InconsistentTokens {
        row: usize,
        stored: usize,
        actual: usize,
    },
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        DatasetError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a dataset generation run. Nothing is published when one occurs.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to read corpus: {0}")]
    Corpus(#[source] DatasetError),
    #[error("corpus dump command failed: {0}")]
    DumpFailed(String),
    #[error("embedding failed for passage batch starting at {chunk}: {source:#}")]
    Embedding {
        chunk: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("generated dataset cannot be served: {0}")]
    Unservable(#[source] DatasetError),
    #[error("failed to publish dataset: {0}")]
    Publish(#[source] DatasetError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        let r = Rejection::QuestionTooLong {
            tokens: 300,
            limit: 250,
        };
        assert_eq!(r.to_string(), "question is 300 tokens, the limit is 250");
        let e: AskError = r.clone().into();
        assert_eq!(e.rejection(), Some(&r));
    }

    #[test]
    fn test_provider_errors_are_not_rejections() {
        let e = AskError::Embedding(anyhow::anyhow!("timeout"));
        assert!(e.rejection().is_none());
        assert!(e.to_string().contains("timeout"));
    }

    #[test]
    fn test_missing_columns_lists_names() {
        let e = DatasetError::MissingColumns {
            path: PathBuf::from("dump.csv"),
            missing: vec!["page_title".into(), "content".into()],
        };
        assert_eq!(
            e.to_string(),
            "dump.csv is missing required column(s): page_title, content"
        );
    }
}
