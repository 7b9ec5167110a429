//! Deterministic fetcher used by the pool, processor and handler tests.

use bytes::Bytes;
use core::time::Duration;
use multiplex_core::{FetchError, Fetcher, Task};
use portable_atomic::{AtomicUsize, Ordering};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Echoes the task back as the body, optionally failing selected tasks and
/// sleeping before answering. Tracks attempts and peak concurrency.
#[derive(Default)]
pub struct StubFetcher {
    fail: HashSet<Task>,
    delay: Duration,
    attempts: AtomicUsize,
    inflight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubFetcher {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn failing(tasks: &[&str]) -> Self {
        Self {
            fail: tasks.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fails `tasks` on top of whatever delay is configured.
    pub fn fail_on(mut self, tasks: &[&str]) -> Self {
        self.fail.extend(tasks.iter().map(|t| (*t).to_string()));
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        task: &Task,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.inflight.fetch_sub(1, Ordering::SeqCst);
        if self.fail.contains(task) {
            return Err(FetchError::Transport(format!("refused: {task}")));
        }
        Ok(Bytes::from(task.clone()))
    }
}

/// Builds `u0..u{n}` task ids.
pub fn tasks(n: usize) -> Vec<Task> {
    (0..n).map(|i| format!("u{i}")).collect()
}
