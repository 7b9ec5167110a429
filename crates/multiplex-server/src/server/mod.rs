//! Server-side components of the `multiplex` batch collector.
//!
//! ## Submodules
//!
//! - [`admission`] - Process-wide admission gate bounding concurrent batches.
//! - [`config`] - CLI/environment configuration.
//! - [`fetch`] - Outbound HTTP fetcher.
//! - [`pool`] - Per-batch worker pool with fail-fast cancellation.
//! - [`service`] - HTTP endpoint and batch orchestration.
//! - [`shutdown`] - Graceful shutdown with a bounded drain.
//! - [`telemetry`] - Structured logging and optional OpenTelemetry export.

pub mod admission;
pub mod config;
pub mod fetch;
pub mod pool;
pub mod service;
pub mod shutdown;
pub mod telemetry;

#[cfg(test)]
pub mod testing;
