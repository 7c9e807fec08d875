/**
 * The unit of work placed on a dispatcher's queue.
 *
 * A `Request` is immutable once built: a URL, the per-request headers, and
 * the `ResponseHandler` that hears about the outcome. Exactly one of
 * `on_success` / `on_error` is invoked, once, from the worker thread that
 * processed the request (or from the thread that cleared it off the queue).
 */
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::{CancelReason, DispatchError};

// ---------------------------------------------------------------------------
// ResponseHandler
// ---------------------------------------------------------------------------

/**
 * Result callback carried by every request.
 *
 * Called synchronously on a worker thread, so implementations should hand
 * heavy work off elsewhere. A panicking handler is caught and logged by the
 * worker; it never takes the worker down.
 */
pub trait ResponseHandler: Send + Sync {
    /// The request completed with a 2xx response.
    fn on_success(&self, body: String);

    /// The request failed or was cancelled.
    fn on_error(&self, error: DispatchError);
}

/**
 * Any `Fn(Result<String, DispatchError>)` closure is a handler, which keeps
 * call sites short:
 *
 * ```ignore
 * Request::new(url).on_response(|result| match result {
 *     Ok(body) => println!("{body}"),
 *     Err(err) => eprintln!("{err}"),
 * });
 * ```
 */
impl<F> ResponseHandler for F
where
    F: Fn(Result<String, DispatchError>) + Send + Sync,
{
    fn on_success(&self, body: String) {
        self(Ok(body))
    }

    fn on_error(&self, error: DispatchError) {
        self(Err(error))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An outbound request plus the handler that receives its result.
#[derive(Clone)]
pub struct Request {
    url: String,
    headers: HashMap<String, String>,
    handler: Arc<dyn ResponseHandler>,
}

impl Request {
    /// Creates a request with no headers whose result is discarded.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            handler: Arc::new(|_result: Result<String, DispatchError>| {}),
        }
    }

    /// Adds (or replaces) a header sent with this request only.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the handler that receives the outcome.
    pub fn on_response(mut self, handler: impl ResponseHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Sets an already shared handler.
    pub fn with_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Delivers `result` to exactly one of the handler's callbacks.
    pub fn respond(self, result: Result<String, DispatchError>) {
        match result {
            Ok(body) => self.handler.on_success(body),
            Err(error) => self.handler.on_error(error),
        }
    }

    /**
     * Reports the request as cancelled without it ever reaching a worker.
     *
     * Runs on whichever thread cleared or dropped the queue, usually in a
     * loop over a drained batch. A panicking handler is caught and logged
     * here so the rest of the batch still hears back.
     */
    pub(crate) fn cancel(self, reason: CancelReason) {
        let url = self.url.clone();
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            self.respond(Err(DispatchError::Cancelled(reason)));
        }));
        if delivered.is_err() {
            error!(%url, %reason, "response handler panicked during cancellation");
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
