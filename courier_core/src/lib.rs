/*!
 * Courier Core — the request dispatch engine.
 *
 * A `Dispatcher` serialises outbound HTTP requests from any number of
 * producer threads onto a fixed set of long-lived worker threads, each with
 * its own transport connection. Subscribe pools retry failed long-polls;
 * non-subscribe pools make exactly one attempt per request. Results come
 * back through the `ResponseHandler` carried by each `Request`.
 *
 * End users normally depend on the `courier` facade crate, which pairs a
 * subscribe pool with a non-subscribe pool over the HTTP transport.
 *
 * # Module structure
 *
 * - `request` — what we send: the request and its result callback
 * - `queue` — the shared blocking FIFO
 * - `transport/` — how we fetch: the transport contract, `ureq` client
 * - `worker` — worker threads, plain and retrying
 * - `dispatcher` — pool lifecycle, queueing, resets, configuration fan-out
 * - `config`, `error` — pool settings and the failure taxonomy
 */

mod config;
mod dispatcher;
mod error;
mod queue;
mod request;
pub mod transport;
mod worker;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{
    ClearPolicy, PoolConfig, PoolKind, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RETRY_INTERVAL_MS,
};
pub use dispatcher::Dispatcher;
pub use error::{CancelReason, DispatchError, Result, TransportError};
pub use queue::RequestQueue;
pub use request::{Request, ResponseHandler};
pub use transport::{HttpTransport, HttpTransportFactory, Response, Transport, TransportFactory};
pub use worker::RetryPolicy;
