//! # wikiqa core
//!
//! Shared, I/O-free logic for wikiqa: data models, markup sanitizer,
//! sentence chunker, tokenizer and embedding traits, and the passage
//! ranking / context packing algorithm.
//!
//! This crate contains no tokio, filesystem, or HTTP dependencies. The
//! `wikiqa` application crate supplies tokenizer and provider backends
//! and the on-disk dataset format.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod sanitize;
pub mod search;
pub mod tokenizer;
