//! Generation progress reporting.
//!
//! Reports observable progress during `wikiqa generate` (and scheduled
//! regenerations run in the foreground) so users see how far chunking and
//! embedding have got. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    /// Corpus loaded.
    Loaded { corpus: String, pages: u64 },
    /// Chunking finished.
    Chunked { pages: u64, passages: u64 },
    /// `n` of `total` passages embedded.
    Embedding { n: u64, total: u64 },
    /// Dataset written under its final name.
    Published { dataset: String, passages: u64 },
}

/// Reports generation progress. Implementations write to stderr (human or JSON).
pub trait GenerationProgress: Send + Sync {
    fn report(&self, event: GenerationEvent);
}

/// Human-friendly progress on stderr: "generate  embedding  1,234 / 5,000 passages".
pub struct StderrProgress;

impl GenerationProgress for StderrProgress {
    fn report(&self, event: GenerationEvent) {
        let line = match &event {
            GenerationEvent::Loaded { corpus, pages } => {
                format!("generate  loaded {}  {} pages\n", corpus, format_number(*pages))
            }
            GenerationEvent::Chunked { pages, passages } => format!(
                "generate  chunked  {} pages -> {} passages\n",
                format_number(*pages),
                format_number(*passages)
            ),
            GenerationEvent::Embedding { n, total } => format!(
                "generate  embedding  {} / {} passages\n",
                format_number(*n),
                format_number(*total)
            ),
            GenerationEvent::Published { dataset, passages } => format!(
                "generate  published {}  {} passages\n",
                dataset,
                format_number(*passages)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl GenerationProgress for JsonProgress {
    fn report(&self, event: GenerationEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &GenerationEvent) -> serde_json::Value {
    match event {
        GenerationEvent::Loaded { corpus, pages } => serde_json::json!({
            "event": "progress",
            "phase": "loaded",
            "corpus": corpus,
            "pages": pages
        }),
        GenerationEvent::Chunked { pages, passages } => serde_json::json!({
            "event": "progress",
            "phase": "chunked",
            "pages": pages,
            "passages": passages
        }),
        GenerationEvent::Embedding { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "n": n,
            "total": total
        }),
        GenerationEvent::Published { dataset, passages } => serde_json::json!({
            "event": "progress",
            "phase": "published",
            "dataset": dataset,
            "passages": passages
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl GenerationProgress for NoProgress {
    fn report(&self, _event: GenerationEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn GenerationProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
