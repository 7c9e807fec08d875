/**
 * Transport layer: the contract workers fetch through.
 *
 * - `Transport` is what a single worker owns: one connection, blocking
 *   `fetch`, timeouts and default headers adjustable from other threads.
 * - `TransportFactory` builds a fresh transport for every new worker
 *   (pool construction and every reset).
 * - `http` is the `ureq`-backed implementation.
 */
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

pub mod http;

pub use http::{HttpTransport, HttpTransportFactory};

/// A completed HTTP exchange, status not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/**
 * One worker's connection.
 *
 * Only the owning worker calls `fetch`, but the dispatcher calls the
 * setters and `reset` from whatever thread the application uses, possibly
 * while a fetch is in flight. Implementations synchronise internally.
 */
pub trait Transport: Send + Sync {
    /// Performs a blocking GET of `url` with `headers` added on top of the
    /// transport's default headers.
    fn fetch(&self, url: &str, headers: &HashMap<String, String>) -> Result<Response, TransportError>;

    fn set_connection_timeout(&self, timeout: Duration);

    fn set_request_timeout(&self, timeout: Duration);

    /// Sets a header sent with every subsequent fetch.
    fn set_header(&self, key: &str, value: &str);

    /// Drops the underlying connection; the next fetch reconnects.
    fn reset(&self);
}

/// Creates the transport for a new worker.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<F> TransportFactory for F
where
    F: Fn(Duration, Duration) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync,
{
    fn create(
        &self,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        self(connect_timeout, request_timeout)
    }
}
