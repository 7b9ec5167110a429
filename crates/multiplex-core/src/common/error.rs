//! Error types for the batch collector service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a client can observe. It implements [`IntoResponse`] so handlers can return
//! it directly and have it rendered with the matching HTTP status and a short
//! message.
//!
//! ## Error Cases
//! - `TooManyTasks`: The batch exceeds the configured task ceiling.
//! - `MalformedRequest`: The request body is not a JSON array of strings.
//! - `MethodNotAllowed`: The endpoint was called with a method other than
//!   `POST`.
//! - `GateTimeout`: No admission slot became free within the wait window.
//! - `BatchFailure`: At least one task failed or the batch was cancelled.
//!   Per-task detail is deliberately collapsed into this single case.
//! - `Encoding`: The response could not be serialized.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the batch collector service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The batch is longer than the configured ceiling.
    #[error("Batch of {count} tasks exceeds maximum allowed ({limit})")]
    TooManyTasks { count: usize, limit: usize },

    /// The request body could not be decoded.
    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// The collector endpoint only accepts `POST`.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The admission gate stayed full for the whole wait window.
    #[error("Admission gate wait timed out")]
    GateTimeout,

    /// One or more tasks failed, or the batch was cancelled.
    #[error("Batch failed")]
    BatchFailure,

    /// The successful outcome could not be serialized.
    #[error("Encoding error: {reason}")]
    Encoding { reason: String },
}

impl Error {
    /// HTTP status reported to the client for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::TooManyTasks { .. } => StatusCode::BAD_REQUEST,
            Self::MalformedRequest { .. } | Self::Encoding { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::GateTimeout => StatusCode::TOO_MANY_REQUESTS,
            Self::BatchFailure => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short message written to the response body.
    ///
    /// Internal failures (`500`) carry no body so decoding and serialization
    /// details never leak to the client.
    pub const fn client_message(&self) -> &'static str {
        match self {
            Self::TooManyTasks { .. } => "exceeded maximum URLs per request",
            Self::MethodNotAllowed => "allowed only POST method",
            Self::GateTimeout => "exceeded simultaneous request limit",
            Self::BatchFailure => "failed to perform outcome requests",
            Self::MalformedRequest { .. } | Self::Encoding { .. } => "",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.client_message();

        if message.is_empty() {
            return status.into_response();
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}
