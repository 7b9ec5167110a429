//! Outbound HTTP fetcher backed by a shared [`reqwest::Client`].

use bytes::Bytes;
use core::time::Duration;
use multiplex_core::{FetchError, Fetcher, Task};
use tokio_util::sync::CancellationToken;

/// Issues one `GET` per task over a pooled client.
///
/// The response status is not inspected: whatever body the target returns is
/// the payload. Dropping the in-flight request (on cancellation) returns its
/// connection to the pool or closes it.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher with its own connection pool.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("multiplex/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, task: &Task, deadline: Duration) -> Result<Bytes, reqwest::Error> {
        let response = self.client.get(task.as_str()).timeout(deadline).send().await?;
        response.bytes().await
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        task: &Task,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            res = self.get(task, deadline) => res.map_err(|e| {
                if e.is_timeout() {
                    FetchError::DeadlineExceeded(deadline)
                } else {
                    FetchError::Transport(e.to_string())
                }
            }),
        }
    }
}
