//! # Wire types
//!
//! - [`Task`] - A single target URL taken from the request batch.
//! - [`Payload`] - One fetched result, serialized as
//!   `{ "url": ..., "payload": ... }` in the response array.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An opaque fetch target. The service never parses it; the fetcher decides
/// whether it is a valid URL.
pub type Task = String;

/// The result of a successful fetch, paired with the task that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    pub url: Task,
    pub payload: String,
}

impl Payload {
    /// Builds a payload from raw response bytes. Invalid UTF-8 sequences are
    /// replaced rather than rejected.
    pub fn from_bytes(url: Task, body: &Bytes) -> Self {
        Self {
            url,
            payload: String::from_utf8_lossy(body).into_owned(),
        }
    }
}
