//! # wikiqa CLI
//!
//! The `wikiqa` binary builds passage datasets from a wiki dump and answers
//! questions against the active one.
//!
//! ## Usage
//!
//! ```bash
//! wikiqa --config ./config/wikiqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wikiqa generate --output <id>` | Chunk (and embed) the corpus dump and publish dataset `<id>` |
//! | `wikiqa inspect [<id>]` | Show a dataset's metadata and counts, or list datasets |
//! | `wikiqa context "<question>"` | Print the packed context for a question |
//! | `wikiqa ask "<question>"` | Answer one question |
//! | `wikiqa chat` | Answer questions read from stdin |
//! | `wikiqa schedule` | Regenerate the active dataset every day at `scheduler.run_at` |
//!
//! ## Examples
//!
//! ```bash
//! # Structural dataset, no embedding calls
//! wikiqa generate --output ships --no-embeddings
//!
//! # Refresh the dump, then build an embedded dataset
//! wikiqa generate --output ships --dump
//!
//! # Check every stored n_tokens against the tokenizer
//! wikiqa inspect ships --verify
//!
//! # Ask with a smaller context window
//! wikiqa ask "What shields does the Theia have?" --budget 1024
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use wikiqa::assistant::{AskRequest, Assistant};
use wikiqa::config::{self, Config};
use wikiqa::dataset::{list_datasets, load_dataset, verify_token_counts, METADATA_FILE};
use wikiqa::embedding::create_provider;
use wikiqa::error::AskError;
use wikiqa::generate::{generate_dataset, DatasetBuilder, GenerateOptions};
use wikiqa::logging;
use wikiqa::progress::{format_number, ProgressMode};
use wikiqa::scheduler::{Cadence, Regenerator, Scheduler};
use wikiqa::tokenizer::create_tokenizer;

/// wikiqa: retrieval-augmented question answering over a wiki dump.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/wikiqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "wikiqa",
    about = "Build passage datasets from a wiki dump and answer questions against them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wikiqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and publish a dataset from the corpus dump.
    ///
    /// Sanitizes every page, splits it into token-bounded passages,
    /// embeds them unless `--no-embeddings` is given, and publishes the
    /// result atomically under `<dataset.root>/<output>`.
    Generate {
        /// Dataset id (directory name) to publish.
        #[arg(long)]
        output: String,

        /// Corpus dump to read instead of `corpus.path`.
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Per-passage token ceiling, overriding `chunking.max_tokens`.
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Skip embedding. The dataset can be inspected but not served.
        #[arg(long)]
        no_embeddings: bool,

        /// Let an unembedded dataset replace `dataset.active` or an
        /// existing servable dataset.
        #[arg(long)]
        force: bool,

        /// Run `corpus.dump_command` before loading the corpus.
        #[arg(long)]
        dump: bool,

        /// Progress output: `off`, `human`, or `json` (stderr).
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show a dataset, or list datasets when no id is given and none is active.
    Inspect {
        /// Dataset id. Defaults to `dataset.active`.
        id: Option<String>,

        /// Re-tokenize every passage and fail on any `n_tokens` mismatch.
        #[arg(long)]
        verify: bool,
    },

    /// Print the context that would be sent with a question.
    Context {
        question: String,

        /// Context token budget, overriding `retrieval.context_budget`.
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        #[arg(long)]
        username: Option<String>,

        /// Context token budget, overriding `retrieval.context_budget`.
        #[arg(long)]
        budget: Option<usize>,

        #[arg(long)]
        max_output_tokens: Option<u32>,

        /// Print the full answer record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer questions read from stdin until `exit`, `quit` or an empty line.
    Chat {
        #[arg(long)]
        username: Option<String>,
    },

    /// Run the daily regeneration scheduler in the foreground.
    ///
    /// Ctrl-C stops it once any in-flight regeneration has finished.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Generate {
            output,
            corpus,
            max_tokens,
            no_embeddings,
            force,
            dump,
            progress,
        } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(s) => match ProgressMode::parse(s) {
                    Some(mode) => mode,
                    None => bail!("Unknown progress mode: {}. Use off, human, or json.", s),
                },
            };
            if no_embeddings && !force {
                refuse_unservable_replacement(&cfg, &output)?;
            }
            run_generate(&cfg, output, corpus, max_tokens, no_embeddings, dump, mode).await?;
        }
        Commands::Inspect { id, verify } => {
            run_inspect(&cfg, id, verify)?;
        }
        Commands::Context { question, budget } => {
            let assistant = Assistant::from_config(&cfg)?;
            let budget = budget.unwrap_or(cfg.retrieval.context_budget);
            let ctx = assistant.retriever().rank_and_pack(&question, budget).await?;

            println!(
                "Dataset: {}  tokens: {}/{}  passages: {}",
                ctx.dataset_id,
                ctx.tokens_used,
                budget,
                ctx.passages.len()
            );
            for (i, p) in ctx.passages.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} ({} tokens)",
                    i + 1,
                    p.distance,
                    p.page_title,
                    p.n_tokens
                );
            }
            println!();
            if ctx.is_empty() {
                println!("(empty context)");
            } else {
                println!("{}", ctx.context);
            }
        }
        Commands::Ask {
            question,
            username,
            budget,
            max_output_tokens,
            json,
        } => {
            let assistant = Assistant::from_config(&cfg)?;
            let request = AskRequest {
                question,
                username,
                context_budget: budget,
                max_output_tokens,
            };
            let answer = match assistant.answer(&request).await {
                Ok(answer) => answer,
                Err(AskError::Rejected(rejection)) => bail!("Request declined: {}", rejection),
                Err(e) => return Err(e.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.answer);
                if answer.context_empty {
                    eprintln!("(answered without context)");
                }
            }
        }
        Commands::Chat { username } => {
            let assistant = Assistant::from_config(&cfg)?;
            run_chat(&assistant, username).await?;
        }
        Commands::Schedule => {
            run_schedule(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_generate(
    cfg: &Config,
    output: String,
    corpus: Option<PathBuf>,
    max_tokens: Option<usize>,
    no_embeddings: bool,
    dump: bool,
    mode: ProgressMode,
) -> Result<()> {
    let mut options = GenerateOptions::from_config(cfg, &output);
    if let Some(corpus) = corpus {
        options.corpus_path = corpus;
    }
    if let Some(max_tokens) = max_tokens {
        if max_tokens == 0 {
            bail!("--max-tokens must be > 0");
        }
        options.chunk.max_tokens = max_tokens;
    }
    if dump {
        options.dump_command = Some(
            cfg.corpus
                .dump_command
                .clone()
                .context("--dump requires corpus.dump_command")?,
        );
    }

    if !no_embeddings && !cfg.embedding.is_enabled() {
        bail!(
            "embedding provider is disabled; pass --no-embeddings to build a dataset that cannot be served"
        );
    }

    let tokenizer = create_tokenizer(&cfg.chunking.tokenizer)?;
    let mut builder = DatasetBuilder::new(tokenizer, options.chunk);
    if !no_embeddings {
        builder = builder.with_embeddings(create_provider(&cfg.embedding)?, options.batch_size);
    }

    let progress = mode.reporter();
    let generation = generate_dataset(&options, &builder, progress.as_ref()).await?;
    let report = &generation.report;

    println!(
        "Published {} ({} passages from {} pages, {} skipped, {} sentences dropped)",
        generation.path.display(),
        format_number(report.passages as u64),
        format_number(report.pages_in as u64),
        report.pages_skipped,
        report.sentences_dropped
    );
    if generation.dataset.metadata.embedding_model.is_some() {
        println!(
            "Embedding tokens: {}",
            format_number(report.embedding_usage.total_tokens as u64)
        );
    }
    Ok(())
}

/// Refuse to let an unembedded build take the place of a dataset that is
/// or could be served.
fn refuse_unservable_replacement(cfg: &Config, output: &str) -> Result<()> {
    if cfg.dataset.active.as_deref() == Some(output) {
        bail!(
            "{} is dataset.active and an unembedded dataset cannot be served; pass --force to replace it anyway",
            output
        );
    }
    if !cfg.dataset.dir(output).join(METADATA_FILE).is_file() {
        return Ok(());
    }
    match load_dataset(&cfg.dataset.root, output) {
        Ok(existing) if existing.is_fully_embedded() => bail!(
            "{} holds a servable dataset ({} embedded passages); pass --force to replace it with an unembedded one",
            output,
            existing.passages.len()
        ),
        _ => Ok(()),
    }
}

fn run_inspect(cfg: &Config, id: Option<String>, verify: bool) -> Result<()> {
    let Some(id) = id.or_else(|| cfg.dataset.active.clone()) else {
        let ids = list_datasets(&cfg.dataset.root)?;
        if ids.is_empty() {
            println!("No datasets under {}", cfg.dataset.root.display());
        }
        for id in ids {
            println!("{}", id);
        }
        return Ok(());
    };

    let dataset = load_dataset(&cfg.dataset.root, &id)?;
    let meta = &dataset.metadata;
    let max_tokens = dataset.passages.iter().map(|p| p.n_tokens).max().unwrap_or(0);
    let total_tokens: usize = dataset.passages.iter().map(|p| p.n_tokens).sum();

    println!("Dataset:         {}", dataset.id);
    println!("Source:          {}", meta.source);
    println!("Generated:       {}", meta.generated_at.to_rfc3339());
    println!("Tokenizer:       {}", meta.tokenizer);
    println!("Max_len:         {}", meta.max_chunk_tokens);
    println!(
        "Embedding model: {}",
        meta.embedding_model.as_deref().unwrap_or("(none)")
    );
    println!("Passages:        {}", format_number(dataset.passages.len() as u64));
    println!(
        "Embedded:        {}",
        format_number(dataset.embedded_count() as u64)
    );
    println!("Tokens:          {} (largest passage {})", format_number(total_tokens as u64), max_tokens);

    if verify {
        let tokenizer = create_tokenizer(&meta.tokenizer)?;
        let mismatches = verify_token_counts(&dataset, tokenizer.as_ref());
        for m in &mismatches {
            eprintln!("  {}", m);
        }
        if !mismatches.is_empty() {
            bail!(
                "{} of {} passages have inconsistent n_tokens",
                mismatches.len(),
                dataset.passages.len()
            );
        }
        println!("Verified:        all n_tokens match {}", tokenizer.name());
    }
    Ok(())
}

async fn run_chat(assistant: &Assistant, username: Option<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() || line == "exit" || line == "quit" {
            break;
        }

        let request = AskRequest {
            question: line.to_string(),
            username: username.clone(),
            ..AskRequest::default()
        };
        match assistant.answer(&request).await {
            Ok(answer) => println!("{}\n", answer.answer),
            Err(AskError::Rejected(rejection)) => println!("Declined: {}\n", rejection),
            Err(e) => eprintln!("Error: {:#}\n", anyhow::Error::from(e)),
        }
    }
    Ok(())
}

async fn run_schedule(cfg: &Config) -> Result<()> {
    if !cfg.scheduler.enabled {
        warn!("scheduler.enabled is false, running anyway because it was requested");
    }
    let at = cfg.scheduler.run_at_time()?;

    let assistant = Assistant::from_config(cfg)?;
    let regenerator = Arc::new(Regenerator::from_config(cfg, assistant.retriever().clone())?);
    let scheduler = Scheduler::new(regenerator, Cadence::DailyAt(at));

    scheduler.start();
    println!(
        "Scheduler running, next regeneration at {} local time. Press Ctrl-C to stop.",
        cfg.scheduler.run_at
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Stopping scheduler...");
    scheduler.stop().await;
    Ok(())
}
