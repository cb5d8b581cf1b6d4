//! Configuration parsing and validation.
//!
//! wikiqa is configured with a single TOML file (default
//! `./config/wikiqa.toml`). Every section except `[dataset]`,
//! `[corpus]` and `[chunking]` may be omitted and falls back to its
//! defaults. API keys are never read from the file; providers take
//! them from `OPENAI_API_KEY` (and optionally `OPENAI_ORG_ID`).
//!
//! ```toml
//! [dataset]
//! root = "./data"
//! active = "galaxypedia-2024-08-19"
//!
//! [corpus]
//! path = "./dumps/galaxypedia.csv"
//! dump_command = ["./scripts/dump.sh", "./dumps/galaxypedia.csv"]
//! escape = "\\"
//!
//! [chunking]
//! max_tokens = 2048
//! tokenizer = "cl100k_base"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [completion]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [scheduler]
//! enabled = true
//! run_at = "00:00"
//! output = "galaxypedia-latest"
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub corpus: CorpusConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    /// Directory holding one sub-directory per dataset.
    pub root: PathBuf,
    /// Dataset loaded at startup.
    #[serde(default)]
    pub active: Option<String>,
}

impl DatasetConfig {
    /// Directory of the dataset named `id`.
    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// CSV dump with `page_title` and `content` columns.
    pub path: PathBuf,
    /// Program and arguments that refresh the dump before regeneration.
    #[serde(default)]
    pub dump_command: Option<Vec<String>>,
    /// Escape character used by the dump writer.
    #[serde(default)]
    pub escape: Option<char>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    #[serde(default)]
    pub flatten_wikilinks: bool,
}

fn default_tokenizer() -> String {
    "cl100k_base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    #[serde(default = "default_max_question_tokens")]
    pub max_question_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_budget: default_context_budget(),
            max_question_tokens: default_max_question_tokens(),
        }
    }
}

fn default_context_budget() -> usize {
    4096
}
fn default_max_question_tokens() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 0,
            timeout_secs: 30,
            base_url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Replaces the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            system_prompt: None,
            timeout_secs: default_completion_timeout_secs(),
            base_url: None,
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_max_output_tokens() -> u32 {
    250
}
fn default_temperature() -> f32 {
    0.2
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            timeout_secs: default_timeout_secs(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Local wall-clock time of the daily run, `HH:MM`.
    #[serde(default = "default_run_at")]
    pub run_at: String,
    /// Dataset id written by scheduled runs. Defaults to `[dataset].active`.
    #[serde(default)]
    pub output: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            run_at: default_run_at(),
            output: None,
        }
    }
}

impl SchedulerConfig {
    pub fn run_at_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.run_at, "%H:%M")
            .with_context(|| format!("scheduler.run_at must be HH:MM, got '{}'", self.run_at))
    }
}

fn default_run_at() -> String {
    "00:00".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Some(escape) = config.corpus.escape {
        if !escape.is_ascii() {
            bail!("corpus.escape must be a single ASCII character");
        }
    }

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    match config.chunking.tokenizer.as_str() {
        "cl100k_base" | "o200k_base" | "whitespace" => {}
        other => bail!(
            "Unknown tokenizer: '{}'. Must be cl100k_base, o200k_base, or whitespace.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.context_budget == 0 {
        bail!("retrieval.context_budget must be > 0");
    }
    if config.retrieval.max_question_tokens == 0 {
        bail!("retrieval.max_question_tokens must be > 0");
    }

    // Validate embedding
    check_provider("embedding", &config.embedding.provider)?;
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate completion
    check_provider("completion", &config.completion.provider)?;
    if config.completion.is_enabled() && config.completion.model.is_none() {
        bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    check_provider("moderation", &config.moderation.provider)?;

    // Validate scheduler
    config.scheduler.run_at_time()?;

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => bail!("Unknown logging.format: '{}'. Must be pretty or json.", other),
    }

    Ok(config)
}

fn check_provider(section: &str, provider: &str) -> Result<()> {
    match provider {
        "disabled" | "openai" => Ok(()),
        other => bail!(
            "Unknown {} provider: '{}'. Must be disabled or openai.",
            section,
            other
        ),
    }
}
