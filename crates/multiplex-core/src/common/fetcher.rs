//! The contract for one outbound fetch.
//!
//! A [`Fetcher`] performs a single request for a [`Task`]. Implementations
//! must return as soon as either the deadline elapses or the cancellation
//! token fires, whichever comes first, and must release anything they
//! acquired (connections, buffers) on every exit path.

use crate::Task;
use bytes::Bytes;
use core::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a single fetch did not produce a body.
///
/// The dispatcher only logs these; clients always see one aggregate failure.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum FetchError {
    /// The request could not be built, sent, or its body read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The per-task deadline elapsed before the body was read.
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The batch was cancelled while the fetch was in flight.
    #[error("Fetch cancelled")]
    Cancelled,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches `task`, giving up after `deadline` or once `cancel` fires.
    async fn fetch(
        &self,
        task: &Task,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError>;
}
