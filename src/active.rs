//! The active dataset.
//!
//! Readers take a [`snapshot`](ActiveDataset::snapshot) at the start of a
//! request and use it for the whole request; a concurrent
//! [`replace`](ActiveDataset::replace) only affects later snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;
use wikiqa_core::models::Dataset;

/// Atomically swappable handle to the dataset used for retrieval.
#[derive(Clone)]
pub struct ActiveDataset {
    inner: Arc<ArcSwap<Dataset>>,
}

impl ActiveDataset {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(dataset)),
        }
    }

    /// The current dataset (lock-free read).
    pub fn snapshot(&self) -> Arc<Dataset> {
        self.inner.load_full()
    }

    /// Swap in `dataset`, returning the one it replaced.
    pub fn replace(&self, dataset: Dataset) -> Arc<Dataset> {
        let id = dataset.id.clone();
        let passages = dataset.passages.len();
        let previous = self.inner.swap(Arc::new(dataset));
        info!(
            previous = %previous.id,
            dataset = %id,
            passages,
            "activated dataset"
        );
        previous
    }

    pub fn id(&self) -> String {
        self.inner.load().id.clone()
    }
}
