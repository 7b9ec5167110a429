//! Per-batch worker pool with fail-fast cancellation.
//!
//! This module defines the [`Dispatcher`], which fans the tasks of one batch
//! out to a bounded set of asynchronous workers and fans their results back
//! in. Workers pull from a shared [`TaskSource`] and push results into a
//! bounded [`mpsc`] collector sized to the batch, so neither side ever needs
//! extra locking.
//!
//! The first failing task cancels the batch's [`CancellationToken`]. Remaining
//! workers stop pulling, in-flight fetches observe the token, and the batch
//! resolves to [`Error::BatchFailure`] with every collected result discarded.

use crate::server::{pool::worker::worker_loop, telemetry::increment_worker_panics};
use core::time::Duration;
use multiplex_core::{Error, Fetcher, Payload, Task};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared, pull-based queue over the tasks of one batch.
///
/// Tasks are handed out in input order. The list itself is immutable; only the
/// cursor moves, with a relaxed atomic increment per pull.
#[derive(Debug)]
pub struct TaskSource {
    tasks: Vec<Task>,
    cursor: AtomicUsize,
}

impl TaskSource {
    pub const fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Takes the next task, or `None` once the batch is exhausted.
    pub fn next_task(&self) -> Option<&Task> {
        self.tasks.get(self.cursor.fetch_add(1, Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Runs batches of fetches on a bounded number of workers.
///
/// A dispatcher holds only immutable configuration. All per-batch state (the
/// task source, the collector and the batch token) is created inside
/// [`Dispatcher::dispatch`] and dropped when it returns.
#[derive(Clone)]
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    max_workers: usize,
    fetch_timeout: Duration,
}

impl Dispatcher {
    /// Constructs a dispatcher running at most `max_workers` concurrent
    /// fetches per batch, each bounded by `fetch_timeout`.
    pub fn new(fetcher: Arc<dyn Fetcher>, max_workers: usize, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            max_workers: max_workers.max(1),
            fetch_timeout,
        }
    }

    /// Number of workers spawned for a batch of `num_tasks` tasks.
    pub fn worker_count(&self, num_tasks: usize) -> usize {
        self.max_workers.min(num_tasks.max(1))
    }

    /// Fetches every task of a batch.
    ///
    /// The batch runs under a child of `parent`, so cancelling `parent` (for
    /// example on shutdown) cancels the batch. Dropping the returned future
    /// also cancels the batch so that detached workers stop pulling tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchFailure`] if any task failed, a worker panicked,
    /// or the batch was cancelled before every worker finished. Results that
    /// were already collected are discarded in that case.
    pub async fn dispatch(
        &self,
        tasks: Vec<Task>,
        parent: &CancellationToken,
    ) -> Result<Vec<Payload>, Error> {
        let batch_token = parent.child_token();
        let _cancel_on_drop = batch_token.clone().drop_guard();

        let num_workers = self.worker_count(tasks.len());
        let source = Arc::new(TaskSource::new(tasks));

        // Sized to the batch so a worker never waits on the collector.
        let (result_tx, mut result_rx) = mpsc::channel(source.len().max(1));

        let handles: Vec<_> = (0..num_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&source),
                    Arc::clone(&self.fetcher),
                    self.fetch_timeout,
                    batch_token.clone(),
                    result_tx.clone(),
                ))
            })
            .collect();
        drop(result_tx);

        // Fan-in barrier: every worker must terminate before we decide.
        for (worker_id, joined) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(e) = joined {
                tracing::error!("Worker {worker_id} terminated abnormally: {e}");
                increment_worker_panics();
                batch_token.cancel();
            }
        }

        if batch_token.is_cancelled() {
            tracing::debug!(
                discarded = result_rx.len(),
                "Batch cancelled, discarding collected results"
            );
            return Err(Error::BatchFailure);
        }

        let mut results = Vec::with_capacity(source.len());
        while let Some(payload) = result_rx.recv().await {
            results.push(payload);
        }

        Ok(results)
    }
}
