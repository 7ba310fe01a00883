//! End-to-end pipeline: targets → batch fetch → map → upsert → statistics.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use articlepipe_crawler::{BatchFetcher, FetchUnit, HttpFetcher};
use articlepipe_shared::{BatchStatistics, FetchConfig, FetchTarget, Result};
use articlepipe_storage::ArticleStore;

use crate::mapper::RecordMapper;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per finished fetch, in completion order.
    fn page_fetched(&self, url: &str, current: usize, total: usize);
    /// Called after each successful upsert.
    fn record_stored(&self, url: &str, id: i64, current: usize, total: usize);
    /// Called when the invocation completes.
    fn done(&self, stats: &BatchStatistics);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _url: &str, _current: usize, _total: usize) {}
    fn record_stored(&self, _url: &str, _id: i64, _current: usize, _total: usize) {}
    fn done(&self, _stats: &BatchStatistics) {}
}

/// Coordinates one fetch batch and the sequential store phase after it.
///
/// Per-item failures only lower the counters. An `Err` means the invocation
/// could not start (invalid configuration, HTTP client construction).
pub struct Pipeline<S> {
    store: S,
    mapper: RecordMapper,
}

impl<S: ArticleStore> Pipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            mapper: RecordMapper::default(),
        }
    }

    pub fn with_mapper(mut self, mapper: RecordMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch `targets` over HTTP and store every successful page under
    /// `source`.
    ///
    /// Configuration is validated before any request is made.
    pub async fn run(
        &self,
        targets: &[FetchTarget],
        source: &str,
        config: &FetchConfig,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchStatistics> {
        config.validate()?;
        let fetcher = HttpFetcher::new(config)?;
        self.run_with(fetcher, targets, source, config.concurrency, progress)
            .await
    }

    /// Same as [`Pipeline::run`] with a caller-supplied fetch unit.
    #[instrument(skip_all, fields(source = %source, total = targets.len(), concurrency = concurrency))]
    pub async fn run_with<F: FetchUnit>(
        &self,
        unit: F,
        targets: &[FetchTarget],
        source: &str,
        concurrency: usize,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchStatistics> {
        let start = Instant::now();
        let batch = BatchFetcher::new(unit, concurrency)?;

        info!(targets = targets.len(), "starting pipeline");

        // --- Phase 1: Fetch ---
        progress.phase("Fetching pages");
        let on_fetched =
            |url: &str, current: usize, total: usize| progress.page_fetched(url, current, total);
        let report = batch.fetch_all(targets, &on_fetched).await;

        // --- Phase 2: Store ---
        progress.phase("Storing articles");
        let mut stats = report.stats;
        let to_store = report.outcomes.len();

        for (i, outcome) in report.outcomes.iter().enumerate() {
            let record = self.mapper.map(outcome, source);
            match self.store.upsert(&record).await {
                Some(id) => {
                    stats.stored += 1;
                    debug!(url = %record.url, id, "stored");
                    progress.record_stored(&record.url, id, i + 1, to_store);
                }
                None => {
                    warn!(url = %record.url, "record not stored, skipping");
                }
            }
        }

        progress.done(&stats);

        info!(
            total = stats.total,
            success = stats.success,
            failed = stats.failed,
            stored = stats.stored,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pipeline complete"
        );

        Ok(stats)
    }
}
