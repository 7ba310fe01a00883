//! Batch fetcher: one task per target, admitted through a [`ConcurrencyGate`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use articlepipe_shared::{BatchStatistics, FetchOutcome, FetchTarget, Result, STATUS_NO_RESPONSE};

use crate::fetch::FetchUnit;
use crate::gate::ConcurrencyGate;

/// Called from the joining task once per finished target: `(url, done, total)`.
pub type OnFetched<'a> = &'a (dyn Fn(&str, usize, usize) + Sync);

/// Result of one [`BatchFetcher::fetch_all`] call.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Status-200 outcomes, in completion order.
    pub outcomes: Vec<FetchOutcome>,
    /// Counters with `stored` left at zero.
    pub stats: BatchStatistics,
    /// Targets answered with a non-200 status.
    pub http_errors: usize,
    /// Targets that produced no response at all.
    pub no_response: usize,
    /// Targets whose task died before producing a result.
    pub aborted: usize,
    pub elapsed: Duration,
}

/// The tagged value every fetch task returns.
struct TaskResult {
    target: FetchTarget,
    outcome: Option<FetchOutcome>,
}

/// Runs a [`FetchUnit`] over many targets with at most K in flight.
pub struct BatchFetcher<F> {
    unit: Arc<F>,
    gate: ConcurrencyGate,
}

impl<F: FetchUnit> BatchFetcher<F> {
    /// Fails with a configuration error when `concurrency` is zero.
    pub fn new(unit: F, concurrency: usize) -> Result<Self> {
        Ok(Self::with_gate(Arc::new(unit), ConcurrencyGate::new(concurrency)?))
    }

    pub fn with_gate(unit: Arc<F>, gate: ConcurrencyGate) -> Self {
        Self { unit, gate }
    }

    pub fn concurrency(&self) -> usize {
        self.gate.capacity()
    }

    /// Fetch every target and wait for all of them.
    ///
    /// A failing or panicking task only affects its own target; nothing is
    /// cancelled early.
    #[instrument(skip_all, fields(batch_id = %Uuid::now_v7(), total = targets.len(), concurrency = self.gate.capacity()))]
    pub async fn fetch_all(&self, targets: &[FetchTarget], on_fetched: OnFetched<'_>) -> BatchReport {
        let started = Instant::now();
        let total = targets.len();

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(total);

        for target in targets {
            let unit = Arc::clone(&self.unit);
            let gate = self.gate.clone();
            let task_target = target.clone();

            let handle = tasks.spawn(async move {
                let _permit = gate.acquire().await;
                let outcome = unit.fetch(&task_target).await;
                TaskResult {
                    target: task_target,
                    outcome,
                }
            });
            pending.insert(handle.id(), target.clone());
        }

        let mut report = BatchReport {
            stats: BatchStatistics {
                total,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut done = 0;

        while let Some(joined) = tasks.join_next_with_id().await {
            done += 1;
            let target = match joined {
                Ok((id, TaskResult { target, outcome })) => {
                    pending.remove(&id);
                    match outcome {
                        Some(outcome) if outcome.is_success() => report.outcomes.push(outcome),
                        Some(outcome) if outcome.status != STATUS_NO_RESPONSE => {
                            debug!(%target, status = outcome.status, "counted as http error");
                            report.http_errors += 1;
                        }
                        _ => report.no_response += 1,
                    }
                    target
                }
                Err(e) => {
                    report.aborted += 1;
                    let target = pending
                        .remove(&e.id())
                        .unwrap_or_else(|| FetchTarget::from("<unknown>"));
                    error!(%target, error = %e, "fetch task aborted");
                    target
                }
            };
            on_fetched(target.as_str(), done, total);
        }

        report.stats.success = report.outcomes.len();
        report.stats.failed = report.http_errors + report.no_response + report.aborted;
        report.elapsed = started.elapsed();

        info!(
            success = report.stats.success,
            failed = report.stats.failed,
            http_errors = report.http_errors,
            no_response = report.no_response,
            aborted = report.aborted,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch complete"
        );
        report
    }
}
