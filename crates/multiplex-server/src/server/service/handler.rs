//! HTTP entry point for batch collection.
//!
//! This module defines [`CollectorService`], the state shared by every
//! request, and the `axum` router exposing it at `POST /collector`.
//!
//! ## Responsibilities
//!
//! - Decode the request body into a batch of URLs.
//! - Hand the batch to the [`BatchProcessor`] under a per-request
//!   cancellation scope derived from the process-wide shutdown token.
//! - Encode the results, or map the failure to a status code and a short
//!   message.

use crate::server::{
    config::{REQUEST_BODY_TIMEOUT, ServerConfig},
    service::processor::BatchProcessor,
    telemetry::{
        increment_batch_errors, increment_batches, record_batch_duration, record_tasks_per_batch,
    },
};
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::header,
    response::{IntoResponse, Response},
    routing::post,
};
use core::time::Duration;
use multiplex_core::{Error, Fetcher, Payload, Task};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::RequestBodyTimeoutLayer;

/// Largest request body accepted on `/collector`. Larger bodies get `413`.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// State behind the `/collector` route.
///
/// Holds the batch processor (and through it the process-wide admission gate)
/// plus the root cancellation token. Every batch runs under a child of that
/// token, so [`CollectorService::shutdown`] fails in-flight batches fast.
#[derive(Clone)]
pub struct CollectorService {
    processor: BatchProcessor,
    shutdown_token: CancellationToken,
    body_timeout: Duration,
}

impl CollectorService {
    pub const fn new(processor: BatchProcessor, shutdown_token: CancellationToken) -> Self {
        Self {
            processor,
            shutdown_token,
            body_timeout: REQUEST_BODY_TIMEOUT,
        }
    }

    /// Sets how long the request body may stall. A stalled body is rejected
    /// with `400` before the batch is decoded.
    #[must_use]
    pub fn with_body_timeout(mut self, body_timeout: Duration) -> Self {
        self.body_timeout = body_timeout;
        self
    }

    /// Creates the service with one admission gate sized from `config`.
    pub fn from_config(config: &ServerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(
            BatchProcessor::from_config(config, fetcher),
            CancellationToken::new(),
        )
        .with_body_timeout(config.body_timeout)
    }

    /// Builds the router serving this service.
    pub fn router(self) -> Router {
        let body_timeout = self.body_timeout;
        Router::new()
            .route("/collector", post(collect).fallback(method_not_allowed))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(RequestBodyTimeoutLayer::new(body_timeout))
            .with_state(self)
    }

    /// Cancels every in-flight batch. New batches fail immediately.
    pub fn shutdown(&self) {
        tracing::info!(
            outstanding = self.processor.gate().outstanding(),
            "Cancelling in-flight batches"
        );
        self.shutdown_token.cancel();
    }

    async fn handle(&self, body: &[u8]) -> Result<Response, Error> {
        let tasks: Vec<Task> =
            serde_json::from_slice(body).map_err(|e| Error::MalformedRequest {
                reason: e.to_string(),
            })?;
        record_tasks_per_batch(tasks.len() as f64);

        let scope = self.shutdown_token.child_token();
        let payloads = self.processor.process(tasks, &scope).await?;

        encode(&payloads)
    }
}

fn encode(payloads: &[Payload]) -> Result<Response, Error> {
    let body = serde_json::to_vec(payloads).map_err(|e| Error::Encoding {
        reason: e.to_string(),
    })?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

async fn collect(State(service): State<CollectorService>, body: Bytes) -> Response {
    let start = std::time::Instant::now();
    increment_batches();

    match service.handle(&body).await {
        Ok(response) => {
            record_batch_duration(start.elapsed().as_millis() as f64);
            response
        }
        Err(e) => {
            increment_batch_errors();
            tracing::error!(status = %e.status_code(), "Batch rejected: {e}");
            e.into_response()
        }
    }
}

async fn method_not_allowed() -> Error {
    tracing::error!("Batch rejected: {}", Error::MethodNotAllowed);
    Error::MethodNotAllowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        admission::AdmissionGate,
        pool::manager::Dispatcher,
        testing::{StubFetcher, tasks},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use std::collections::HashSet;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use tower::ServiceExt;

    struct Limits {
        batches: usize,
        workers: usize,
        max_tasks: usize,
        fetch_timeout: Duration,
    }

    impl Default for Limits {
        fn default() -> Self {
            Self {
                batches: 100,
                workers: 4,
                max_tasks: 20,
                fetch_timeout: Duration::from_secs(10),
            }
        }
    }

    fn service(fetcher: Arc<StubFetcher>, limits: Limits) -> CollectorService {
        let processor = BatchProcessor::new(
            Arc::new(AdmissionGate::new(limits.batches, Duration::from_secs(1))),
            Dispatcher::new(fetcher, limits.workers, limits.fetch_timeout),
            limits.max_tasks,
        );
        CollectorService::new(processor, CancellationToken::new())
    }

    fn post_batch(urls: &[String]) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/collector")
            .body(Body::from(serde_json::to_vec(urls).unwrap()))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn echoes_every_url() {
        let fetcher = Arc::new(StubFetcher::echo());
        let router = service(
            fetcher.clone(),
            Limits {
                workers: 2,
                ..Limits::default()
            },
        )
        .router();

        let urls: Vec<String> = ["u1", "u2", "u3"].map(String::from).to_vec();
        let (status, body) = send(router, post_batch(&urls)).await;

        assert_eq!(status, StatusCode::OK);
        let payloads: Vec<Payload> = serde_json::from_slice(&body).unwrap();
        let got: HashSet<_> = payloads.into_iter().map(|p| (p.url, p.payload)).collect();
        let expected: HashSet<_> = urls.iter().map(|u| (u.clone(), u.clone())).collect();
        assert_eq!(got, expected);
        assert_eq!(fetcher.attempts(), 3);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_array() {
        let router = service(Arc::new(StubFetcher::echo()), Limits::default()).router();

        let (status, body) = send(router, post_batch(&[])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn oversized_batch_is_bad_request() {
        let fetcher = Arc::new(StubFetcher::echo());
        let router = service(fetcher.clone(), Limits::default()).router();

        let (status, body) = send(router, post_batch(&tasks(25))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(&body[..], b"exceeded maximum URLs per request");
        assert_eq!(fetcher.attempts(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_is_gateway_timeout() {
        let router = service(Arc::new(StubFetcher::failing(&["u2"])), Limits::default()).router();

        let (status, body) = send(router, post_batch(&tasks(5))).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(&body[..], b"failed to perform outcome requests");
    }

    #[tokio::test]
    async fn only_post_is_allowed() {
        let router = service(Arc::new(StubFetcher::echo()), Limits::default()).router();
        let request = Request::builder()
            .method(Method::GET)
            .uri("/collector")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(router, request).await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(&body[..], b"allowed only POST method");
    }

    #[tokio::test]
    async fn malformed_body_is_internal_error() {
        let fetcher = Arc::new(StubFetcher::echo());
        let router = service(fetcher.clone(), Limits::default()).router();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/collector")
            .body(Body::from(r#"{"url": "u1"}"#))
            .unwrap();

        let (status, body) = send(router, request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
        assert_eq!(fetcher.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_request_over_capacity_is_rejected() {
        let fetcher = Arc::new(StubFetcher::slow(Duration::from_secs(5)));
        let router = service(fetcher, Limits::default()).router();

        let requests: Vec<_> = (0..101)
            .map(|_| tokio::spawn(send(router.clone(), post_batch(&tasks(1)))))
            .collect();

        let mut ok = 0;
        let mut rejected = 0;
        for request in futures::future::join_all(requests).await {
            let (status, body) = request.unwrap();
            if status == StatusCode::OK {
                ok += 1;
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                assert_eq!(&body[..], b"exceeded simultaneous request limit");
                rejected += 1;
            } else {
                panic!("unexpected status {status}");
            }
        }

        assert_eq!(ok, 100);
        assert_eq!(rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_in_flight_batches() {
        let fetcher = Arc::new(StubFetcher::slow(Duration::from_secs(5)));
        let service = service(fetcher, Limits::default());
        let router = service.clone().router();

        let in_flight = tokio::spawn(send(router, post_batch(&tasks(3))));
        tokio::time::sleep(Duration::from_secs(1)).await;
        service.shutdown();

        let (status, _) = in_flight.await.unwrap();
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn oversized_body_is_payload_too_large() {
        let fetcher = Arc::new(StubFetcher::echo());
        let router = service(fetcher.clone(), Limits::default()).router();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/collector")
            .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
            .unwrap();

        let (status, _) = send(router, request).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(fetcher.attempts(), 0);
    }

    #[tokio::test]
    async fn stalled_body_is_rejected_after_timeout() {
        let fetcher = Arc::new(StubFetcher::echo());
        let router = service(fetcher.clone(), Limits::default())
            .with_body_timeout(Duration::from_millis(200))
            .router();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, router).await });

        // Announce 100 bytes but only send the start of the array.
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"POST /collector HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100\r\n\r\n[\"u1")
            .await
            .unwrap();

        let mut response = vec![0; 64];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut response))
            .await
            .expect("server kept waiting on the stalled body")
            .unwrap();

        assert!(
            response[..read].starts_with(b"HTTP/1.1 400"),
            "{}",
            String::from_utf8_lossy(&response[..read])
        );
        assert_eq!(fetcher.attempts(), 0);
        server.abort();
    }
}
