use crate::server::{pool::manager::TaskSource, telemetry::increment_fetches_completed};
use bytes::Bytes;
use core::time::Duration;
use multiplex_core::{FetchError, Fetcher, Payload, Task};
use std::sync::Arc;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;

/// Worker task responsible for draining a batch's [`TaskSource`].
///
/// The worker pulls one task at a time, fetches it, and forwards the result to
/// the batch collector. It stops when the source is exhausted or when the
/// batch token is cancelled. A failed fetch cancels the token itself, which
/// stops every sibling worker of the batch.
///
/// # Arguments
///
/// - `worker_id`: Index of this worker within the batch (used for logs).
/// - `source`: Shared task source of the batch.
/// - `fetcher`: Performs the outbound request for each task.
/// - `deadline`: Upper bound for a single fetch.
/// - `cancel`: The batch cancellation token.
/// - `results`: Sender half of the batch collector.
pub async fn worker_loop(
    worker_id: usize,
    source: Arc<TaskSource>,
    fetcher: Arc<dyn Fetcher>,
    deadline: Duration,
    cancel: CancellationToken,
    results: mpsc::Sender<Payload>,
) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("Worker {worker_id} observed cancellation, not taking new tasks");
            break;
        }

        let Some(task) = source.next_task() else {
            break;
        };

        match fetch_task(fetcher.as_ref(), task, deadline, &cancel).await {
            Ok(body) => {
                increment_fetches_completed();
                if results.send(Payload::from_bytes(task.clone(), &body)).await.is_err() {
                    tracing::debug!("Worker {worker_id} collector closed");
                    cancel.cancel();
                    break;
                }
            }
            Err(FetchError::Cancelled) => {
                tracing::debug!(url = %task, "Worker {worker_id} fetch cancelled");
                cancel.cancel();
                break;
            }
            Err(e) => {
                tracing::warn!(url = %task, "Worker {worker_id} fetch failed: {e}");
                cancel.cancel();
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}

/// Runs one fetch bound to `deadline` and to the batch token, whichever fires
/// first.
async fn fetch_task(
    fetcher: &dyn Fetcher,
    task: &Task,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes, FetchError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(FetchError::Cancelled),
        res = timeout(deadline, fetcher.fetch(task, deadline, cancel)) => {
            res.unwrap_or(Err(FetchError::DeadlineExceeded(deadline)))
        }
    }
}
