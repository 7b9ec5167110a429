//! Process-wide admission control for incoming batches.
//!
//! [`AdmissionGate`] is a counting semaphore with a bounded wait. Each batch
//! must hold an [`AdmissionPermit`] while it runs; the permit returns its slot
//! to the gate when dropped, so release happens on every exit path of the
//! batch (success, failure, cancellation, or unwinding).
//!
//! One gate is created at startup and shared through the HTTP state. There is
//! no global instance.

use crate::server::telemetry::{decrement_batches_inflight, increment_batches_inflight};
use core::time::Duration;
use multiplex_core::Error;
use std::sync::Arc;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};

/// Bounds how many batches are processed at the same time.
///
/// Waiters are served in FIFO order.
#[derive(Debug)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
    wait: Duration,
}

/// A held admission slot. Dropping it releases the slot.
#[derive(Debug)]
#[must_use = "the admission slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Creates a gate admitting at most `capacity` concurrent holders. A
    /// caller waits at most `wait` for a slot.
    pub fn new(capacity: usize, wait: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            wait,
        }
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GateTimeout`] if no slot became free within the
    /// gate's wait window. The outstanding count is unchanged in that case.
    pub async fn acquire(&self) -> Result<AdmissionPermit, Error> {
        match timeout(self.wait, Arc::clone(&self.slots).acquire_owned()).await {
            Ok(Ok(slot)) => {
                increment_batches_inflight();
                Ok(AdmissionPermit { _slot: slot })
            }
            // The semaphore is never closed, so only the timeout can fire in
            // practice. Treat a closed gate the same way.
            Ok(Err(_)) | Err(_) => {
                tracing::debug!(
                    capacity = self.capacity,
                    wait = ?self.wait,
                    "Admission gate wait timed out"
                );
                Err(Error::GateTimeout)
            }
        }
    }

    /// Number of slots currently held.
    pub fn outstanding(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        decrement_batches_inflight();
    }
}
