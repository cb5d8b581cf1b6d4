//! # wikiqa
//!
//! Retrieval-augmented question answering over a wiki dump.
//!
//! A corpus dump (one row per page) is sanitized, split at sentence
//! boundaries into token-bounded passages, embedded, and frozen into a
//! versioned dataset on disk. At question time the question is embedded,
//! passages are ranked by cosine distance, and the nearest are packed into
//! a token budget that becomes the context of a chat completion.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────────┐   ┌──────────────┐
//! │ Corpus dump │──▶│ Chunk + Embed   │──▶│ Dataset dir  │
//! │   (CSV)     │   │ (generate)      │   │ passages.csv │
//! └─────────────┘   └─────────────────┘   └──────┬───────┘
//!                                                │ load + swap
//!                                         ┌──────▼───────┐
//!                     question ──────────▶│  Retriever   │
//!                                         └──────┬───────┘
//!                                                ▼
//!                                         ┌──────────────┐
//!                                         │  Assistant   │──▶ answer
//!                                         └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wikiqa generate --output galaxypedia-2024-08-19
//! wikiqa context "what is the theia?"
//! wikiqa ask "what is the theia?" --username pilot
//! wikiqa schedule
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Typed error taxonomy |
//! | [`tokenizer`] | tiktoken-backed tokenizers |
//! | [`embedding`] | Embedding providers |
//! | [`moderation`] | Question moderation |
//! | [`completion`] | Chat completion providers |
//! | [`corpus`] | Corpus dump reader |
//! | [`dataset`] | Dataset persistence |
//! | [`progress`] | Generation progress reporting |
//! | [`generate`] | Dataset generation pipeline |
//! | [`active`] | Atomically swappable active dataset |
//! | [`retriever`] | Question validation, ranking and packing |
//! | [`assistant`] | End-to-end answer pipeline |
//! | [`scheduler`] | Periodic dataset regeneration |

pub mod active;
pub mod assistant;
pub mod completion;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod logging;
pub mod moderation;
pub mod progress;
pub mod retriever;
pub mod scheduler;
pub mod tokenizer;

pub use wikiqa_core::models::{Dataset, DatasetMetadata, Page, Passage, Usage};
