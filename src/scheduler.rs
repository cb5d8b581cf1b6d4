//! Periodic dataset regeneration.
//!
//! [`Regenerator`] runs one regeneration cycle behind an Idle/Generating
//! gate:
//!
//! ```text
//! [dump command] → load corpus → build → ensure_servable → publish → activate
//! ```
//!
//! A trigger while a cycle is running returns
//! [`TriggerOutcome::AlreadyRunning`] instead of starting a second one.
//! Retrieval keeps using the previous dataset until the new one is
//! activated, and keeps using it if the cycle fails.
//!
//! [`Scheduler`] owns a tokio task that triggers the regenerator once a
//! day at a local wall-clock time. `start` and `stop` are idempotent, and
//! `stop` waits for an in-flight cycle to finish instead of cancelling it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dataset::ensure_servable;
use crate::embedding::create_provider;
use crate::error::GenerationError;
use crate::generate::{build_dataset, publish, DatasetBuilder, GenerateOptions};
use crate::progress::NoProgress;
use crate::retriever::Retriever;
use crate::tokenizer::create_tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationStatus {
    Idle,
    Generating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed { dataset_id: String },
    AlreadyRunning,
}

pub struct Regenerator {
    retriever: Arc<Retriever>,
    builder: DatasetBuilder,
    options: GenerateOptions,
    generating: AtomicBool,
}

/// Resets the gate when a cycle ends, including on error or cancellation.
struct GenerationGuard<'a>(&'a AtomicBool);

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Regenerator {
    pub fn new(retriever: Arc<Retriever>, builder: DatasetBuilder, options: GenerateOptions) -> Self {
        Self {
            retriever,
            builder,
            options,
            generating: AtomicBool::new(false),
        }
    }

    /// Regenerate into `[scheduler] output` (or the active dataset id),
    /// refreshing the dump with `[corpus] dump_command` when configured.
    pub fn from_config(config: &Config, retriever: Arc<Retriever>) -> Result<Self> {
        let output = config
            .scheduler
            .output
            .clone()
            .or_else(|| config.dataset.active.clone())
            .ok_or_else(|| anyhow::anyhow!("scheduler.output or dataset.active must be set"))?;

        let mut options = GenerateOptions::from_config(config, &output);
        options.dump_command = config.corpus.dump_command.clone();

        let embedder = create_provider(&config.embedding)?;
        let tokenizer = create_tokenizer(&config.chunking.tokenizer)?;
        let builder = DatasetBuilder::new(tokenizer, options.chunk)
            .with_embeddings(embedder, config.embedding.batch_size);

        Ok(Self::new(retriever, builder, options))
    }

    pub fn status(&self) -> GenerationStatus {
        if self.generating.load(Ordering::Acquire) {
            GenerationStatus::Generating
        } else {
            GenerationStatus::Idle
        }
    }

    /// Run one cycle unless one is already running.
    pub async fn trigger(&self) -> Result<TriggerOutcome, GenerationError> {
        if self
            .generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("regeneration already running, ignoring trigger");
            return Ok(TriggerOutcome::AlreadyRunning);
        }
        let _guard = GenerationGuard(&self.generating);

        info!(output = %self.options.output, "regeneration started");
        let built = build_dataset(&self.options, &self.builder, &NoProgress).await?;
        ensure_servable(&built.dataset, self.retriever.tokenizer())
            .map_err(GenerationError::Unservable)?;

        let generation = publish(&self.options, built, &NoProgress)?;
        let dataset_id = generation.dataset.id.clone();
        self.retriever
            .activate(generation.dataset)
            .map_err(GenerationError::Unservable)?;

        info!(
            dataset = %dataset_id,
            passages = generation.report.passages,
            embedding_tokens = generation.report.embedding_usage.total_tokens,
            "regeneration finished"
        );
        Ok(TriggerOutcome::Completed { dataset_id })
    }
}

/// When the scheduler fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once a day at this local time.
    DailyAt(NaiveTime),
    /// Repeatedly, this long after the previous cycle ended.
    Every(Duration),
}

impl Cadence {
    fn delay_from(&self, now: NaiveDateTime) -> Duration {
        match self {
            Cadence::DailyAt(at) => (next_occurrence(now, *at) - now)
                .to_std()
                .unwrap_or(Duration::ZERO),
            Cadence::Every(period) => *period,
        }
    }
}

/// The first instant strictly after `now` whose time of day is `at`.
pub fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

struct Running {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    regenerator: Arc<Regenerator>,
    cadence: Cadence,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(regenerator: Arc<Regenerator>, cadence: Cadence) -> Self {
        Self {
            regenerator,
            cadence,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|r| !r.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Spawn the scheduling task. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            error!("scheduler state poisoned");
            return false;
        };
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.regenerator.clone(), self.cadence, stop_rx));
        *running = Some(Running { stop_tx, handle });
        info!(cadence = ?self.cadence, "scheduler started");
        true
    }

    /// Stop the scheduling task, waiting for an in-flight cycle to finish.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => None,
        };
        let Some(running) = running else {
            return false;
        };

        let _ = running.stop_tx.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        info!("scheduler stopped");
        true
    }
}

async fn run_loop(regenerator: Arc<Regenerator>, cadence: Cadence, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let delay = cadence.delay_from(Local::now().naive_local());
        info!(?delay, "next regeneration scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        // Not raced against the stop signal: a started cycle always completes.
        match regenerator.trigger().await {
            Ok(TriggerOutcome::Completed { dataset_id }) => {
                info!(dataset = %dataset_id, "scheduled regeneration completed");
            }
            Ok(TriggerOutcome::AlreadyRunning) => {}
            Err(e) => error!(error = %e, "scheduled regeneration failed"),
        }

        if *stop_rx.borrow() {
            break;
        }
    }
}
