use crate::server::{admission::AdmissionGate, config::ServerConfig, pool::manager::Dispatcher};
use multiplex_core::{Error, Fetcher, Payload, Task};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one batch end to end: validation, admission, dispatch.
///
/// The processor combines the two concurrency ceilings of the service. The
/// shared [`AdmissionGate`] bounds how many batches run at once across the
/// process; the [`Dispatcher`] bounds how many fetches a single batch runs at
/// once. Cloning a processor shares the gate.
#[derive(Clone)]
pub struct BatchProcessor {
    gate: Arc<AdmissionGate>,
    dispatcher: Dispatcher,
    max_tasks: usize,
}

impl BatchProcessor {
    pub const fn new(gate: Arc<AdmissionGate>, dispatcher: Dispatcher, max_tasks: usize) -> Self {
        Self {
            gate,
            dispatcher,
            max_tasks,
        }
    }

    /// Wires a processor from the server configuration around `fetcher`.
    pub fn from_config(config: &ServerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let gate = AdmissionGate::new(config.max_batches, config.admission_wait);
        let dispatcher = Dispatcher::new(fetcher, config.max_workers, config.fetch_timeout);
        Self::new(Arc::new(gate), dispatcher, config.max_tasks)
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Processes one batch.
    ///
    /// Oversized batches are rejected before the gate is touched. Once
    /// admitted, the batch holds its slot until the dispatcher has finished,
    /// and the slot is returned on every exit path, including when this
    /// future is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyTasks`] if the batch exceeds the task ceiling.
    /// - [`Error::GateTimeout`] if no admission slot became free in time.
    /// - [`Error::BatchFailure`] if any fetch failed or `scope` was cancelled.
    #[tracing::instrument(name = "batch", skip_all, fields(tasks = tasks.len()))]
    pub async fn process(
        &self,
        tasks: Vec<Task>,
        scope: &CancellationToken,
    ) -> Result<Vec<Payload>, Error> {
        if tasks.len() > self.max_tasks {
            return Err(Error::TooManyTasks {
                count: tasks.len(),
                limit: self.max_tasks,
            });
        }

        let _permit = self.gate.acquire().await?;
        tracing::debug!(
            outstanding = self.gate.outstanding(),
            capacity = self.gate.capacity(),
            "Batch admitted"
        );

        self.dispatcher.dispatch(tasks, scope).await
    }
}
