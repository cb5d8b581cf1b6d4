//! Corpus dump reader.
//!
//! A dump is a CSV file with a header row containing at least the
//! `page_title` and `content` columns (other columns are ignored). Dumps
//! written by `mysqldump`-style tools escape quotes and line breaks with a
//! backslash; set `[corpus] escape = "\\"` for those.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};
use wikiqa_core::models::Page;

use crate::error::DatasetError;

/// Pages read from one dump file.
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    /// File name of the dump, recorded in dataset metadata.
    pub name: String,
    /// Pages in file order, titles unique.
    pub pages: Vec<Page>,
}

/// Read a corpus dump.
///
/// Rows with an empty title or empty content are skipped. When a title
/// occurs more than once only the first row is kept.
pub fn load_corpus(path: &Path, escape: Option<char>) -> Result<Corpus, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .escape(escape.filter(char::is_ascii).map(|c| c as u8))
        .from_path(path)
        .map_err(|e| DatasetError::csv(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| DatasetError::csv(path, e))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (title_idx, content_idx) = match (column("page_title"), column("content")) {
        (Some(t), Some(c)) => (t, c),
        (t, c) => {
            let mut missing = Vec::new();
            if t.is_none() {
                missing.push("page_title".to_string());
            }
            if c.is_none() {
                missing.push("content".to_string());
            }
            return Err(DatasetError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            });
        }
    };

    let mut pages = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;

    for (i, record) in reader.records().enumerate() {
        let row = i + 1;
        let record = record.map_err(|e| DatasetError::csv(path, e))?;
        let (Some(title), Some(content)) = (record.get(title_idx), record.get(content_idx)) else {
            return Err(DatasetError::MalformedRow {
                row,
                reason: format!("expected at least {} fields", title_idx.max(content_idx) + 1),
            });
        };

        let title = title.trim();
        if title.is_empty() || content.trim().is_empty() {
            debug!(row, "skipping corpus row with empty title or content");
            skipped += 1;
            continue;
        }
        if !seen.insert(title.to_string()) {
            warn!(row, title, "duplicate page title, keeping the first occurrence");
            skipped += 1;
            continue;
        }

        pages.push(Page::new(title, fold_continuations(content)));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    info!(corpus = %name, pages = pages.len(), skipped, "loaded corpus");

    Ok(Corpus { name, pages })
}

/// Turn backslash line continuations into plain line breaks.
fn fold_continuations(content: &str) -> String {
    content.replace("\\\r\n", "\n").replace("\\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reads_pages_in_order() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "galaxypedia.csv",
            "page_title,content\nTheia,\"A light cruiser. It has 500 shield.\"\nDeity,A battleship.\n",
        );
        let corpus = load_corpus(&path, None).unwrap();
        assert_eq!(corpus.name, "galaxypedia.csv");
        assert_eq!(
            corpus.pages,
            vec![
                Page::new("Theia", "A light cruiser. It has 500 shield."),
                Page::new("Deity", "A battleship."),
            ]
        );
    }

    #[test]
    fn test_extra_columns_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "d.csv", "id,content,page_title\n1,Body,Title\n");
        let corpus = load_corpus(&path, None).unwrap();
        assert_eq!(corpus.pages, vec![Page::new("Title", "Body")]);
    }

    #[test]
    fn test_missing_columns_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "d.csv", "title,body\nTheia,text\n");
        match load_corpus(&path, None) {
            Err(DatasetError::MissingColumns { missing, .. }) => {
                assert_eq!(missing, vec!["page_title", "content"]);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_skips_empty_and_duplicate_rows() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "d.csv",
            "page_title,content\nTheia,first\n,orphan\nEmpty,\"  \"\nTheia,second\n",
        );
        let corpus = load_corpus(&path, None).unwrap();
        assert_eq!(corpus.pages, vec![Page::new("Theia", "first")]);
    }

    #[test]
    fn test_backslash_escapes() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "d.csv",
            "page_title,content\nTheia,\"say \\\"hi\\\" now\"\nDeity,\"line one\\\nline two\"\n",
        );
        let corpus = load_corpus(&path, Some('\\')).unwrap();
        assert_eq!(corpus.pages[0].content, "say \"hi\" now");
        assert_eq!(corpus.pages[1].content, "line one\nline two");
    }

    #[test]
    fn test_fold_continuations() {
        assert_eq!(fold_continuations("a\\\nb"), "a\nb");
        assert_eq!(fold_continuations("a\\nb"), "a\\nb");
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_corpus(Path::new("/nonexistent/dump.csv"), None),
            Err(DatasetError::Csv { .. })
        ));
    }
}
