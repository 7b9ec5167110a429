//! Per-batch worker pool.
//!
//! - [`manager`] - The [`Dispatcher`](manager::Dispatcher) and its shared task
//!   source.
//! - [`worker`] - The loop each worker runs until the batch is drained or
//!   cancelled.

pub mod manager;
pub mod worker;
