//! HTTP service implementation and batch orchestration.
//!
//! This module contains the client-facing `/collector` endpoint and the
//! orchestration of a single batch through admission control and the worker
//! pool.
//!
//! ## Structure
//!
//! - [`handler`] - `axum` entry point (`CollectorService`).
//! - [`processor`] - Validation, admission and dispatch of one batch
//!   (`BatchProcessor`).

pub mod handler;
pub mod processor;
