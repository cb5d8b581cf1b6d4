//! Sentence-boundary passage chunker.
//!
//! Turns wiki [`Page`]s into token-bounded [`Passage`]s. Every passage is
//! attributable to exactly one page and never exceeds `max_tokens` under
//! the supplied [`Tokenizer`].
//!
//! # Algorithm
//!
//! 1. Sanitize the page markup; a page with nothing left is skipped.
//! 2. Prefix the normalized title: `"{title}. {content}"`.
//! 3. Count tokens of the whole text. If it fits, it is one passage.
//! 4. Otherwise split on the literal `". "` and greedily accumulate
//!    sentences while `Σ (count(" " + sentence) + 1) <= max_tokens`.
//!    A sentence that alone exceeds `max_tokens` is dropped, never
//!    truncated.
//! 5. Re-tokenize every closed chunk for its final `n_tokens`.
//!
//! # Example
//!
//! ```rust
//! use wikiqa_core::chunk::{chunk_page, ChunkOptions};
//! use wikiqa_core::models::Page;
//! use wikiqa_core::tokenizer::WhitespaceTokenizer;
//!
//! let page = Page::new("Theia", "A light cruiser. It has 500 shield.");
//! let chunked = chunk_page(&page, &ChunkOptions::new(700), &WhitespaceTokenizer);
//! assert_eq!(chunked.passages.len(), 1);
//! assert_eq!(chunked.passages[0].content, "theia. A light cruiser. It has 500 shield.");
//! ```

use crate::models::{Page, Passage};
use crate::sanitize::{prefixed_content, sanitize_content, SanitizeOptions};
use crate::tokenizer::Tokenizer;

/// Literal sentence delimiter.
pub const SENTENCE_DELIMITER: &str = ". ";

/// Chunker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Per-passage token ceiling `T`.
    pub max_tokens: usize,
    pub sanitize: SanitizeOptions,
}

impl ChunkOptions {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            sanitize: SanitizeOptions::default(),
        }
    }
}

/// Output of [`split_into_chunks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitText {
    pub chunks: Vec<String>,
    /// Sentences discarded because they alone exceed the ceiling.
    pub dropped_sentences: usize,
}

/// Result of chunking one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkedPage {
    pub passages: Vec<Passage>,
    pub dropped_sentences: usize,
    /// True when the page was empty after sanitization.
    pub skipped: bool,
}

/// Result of chunking a whole corpus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkReport {
    /// Passages in page order, without embeddings.
    pub passages: Vec<Passage>,
    pub pages_in: usize,
    pub pages_skipped: usize,
    pub sentences_dropped: usize,
}

/// Split `text` at `". "` into chunks of at most `max_tokens` tokens.
///
/// Chunks are closed as `sentences.join(". ")` followed by a `.`, with one
/// exception to that rule: no `.` is appended when the last sentence
/// already ends with one (a page's final sentence keeps its own period),
/// so a chunk never ends in `..`. If a closed chunk still
/// re-tokenizes above the ceiling (the per-sentence estimate is not exact
/// for every tokenizer) it is split again at sentence boundaries.
pub fn split_into_chunks(text: &str, max_tokens: usize, tokenizer: &dyn Tokenizer) -> SplitText {
    let mut out = SplitText::default();
    let mut current: Vec<&str> = Vec::new();
    let mut tokens_so_far = 0usize;

    for sentence in text.split(SENTENCE_DELIMITER) {
        if sentence.trim().is_empty() {
            continue;
        }
        let n = tokenizer.count_tokens(&format!(" {}", sentence));

        if tokens_so_far + n > max_tokens && !current.is_empty() {
            close_chunk(&mut current, max_tokens, tokenizer, &mut out);
            tokens_so_far = 0;
        }

        if n > max_tokens {
            out.dropped_sentences += 1;
            continue;
        }

        current.push(sentence);
        tokens_so_far += n + 1;
    }

    if !current.is_empty() {
        close_chunk(&mut current, max_tokens, tokenizer, &mut out);
    }

    out
}

fn join_sentences(sentences: &[&str]) -> String {
    let mut text = sentences.join(SENTENCE_DELIMITER);
    if !text.ends_with('.') {
        text.push('.');
    }
    text
}

/// Emit the accumulated sentences, re-splitting while the joined text is too long.
fn close_chunk(
    sentences: &mut Vec<&str>,
    max_tokens: usize,
    tokenizer: &dyn Tokenizer,
    out: &mut SplitText,
) {
    let mut pending: &[&str] = sentences;
    while !pending.is_empty() {
        let mut take = pending.len();
        loop {
            let text = join_sentences(&pending[..take]);
            if tokenizer.count_tokens(&text) <= max_tokens {
                out.chunks.push(text);
                break;
            }
            if take == 1 {
                out.dropped_sentences += 1;
                break;
            }
            take -= 1;
        }
        pending = &pending[take..];
    }
    sentences.clear();
}

/// Run sanitize → prefix → measure → split → re-measure for one page.
pub fn chunk_page(page: &Page, options: &ChunkOptions, tokenizer: &dyn Tokenizer) -> ChunkedPage {
    let sanitized = sanitize_content(&page.content, &options.sanitize);
    if sanitized.is_empty() {
        return ChunkedPage {
            skipped: true,
            ..ChunkedPage::default()
        };
    }

    let text = prefixed_content(&page.title, &sanitized);
    let n_tokens = tokenizer.count_tokens(&text);

    if n_tokens <= options.max_tokens {
        return ChunkedPage {
            passages: vec![Passage {
                page_title: page.title.clone(),
                content: text,
                n_tokens,
                embedding: None,
            }],
            dropped_sentences: 0,
            skipped: false,
        };
    }

    let split = split_into_chunks(&text, options.max_tokens, tokenizer);
    let passages = split
        .chunks
        .into_iter()
        .map(|content| Passage {
            page_title: page.title.clone(),
            n_tokens: tokenizer.count_tokens(&content),
            content,
            embedding: None,
        })
        .collect();

    ChunkedPage {
        passages,
        dropped_sentences: split.dropped_sentences,
        skipped: false,
    }
}

/// Chunk every page, preserving page order.
pub fn chunk_pages(pages: &[Page], options: &ChunkOptions, tokenizer: &dyn Tokenizer) -> ChunkReport {
    let mut report = ChunkReport {
        pages_in: pages.len(),
        ..ChunkReport::default()
    };
    for page in pages {
        let chunked = chunk_page(page, options, tokenizer);
        if chunked.skipped {
            report.pages_skipped += 1;
        }
        report.sentences_dropped += chunked.dropped_sentences;
        report.passages.extend(chunked.passages);
    }
    report
}
