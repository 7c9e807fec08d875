/*!
 * Error taxonomy for the dispatcher.
 *
 * Nothing here is ever thrown past a worker loop. Every failure a request
 * can meet is converted into a `DispatchError` and handed to that request's
 * `ResponseHandler::on_error`. The only fallible dispatcher operations are
 * the ones that have to create transports or spawn threads.
 */
use std::fmt;

use thiserror::Error;

/// Result alias for fallible dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/**
 * A failure surfaced by a `Transport` implementation.
 *
 * The HTTP transport produces `Http`; test doubles and custom transports
 * use `Other`.
 */
#[derive(Debug, Error)]
pub enum TransportError {
    /// The `ureq` agent failed to connect, send, or read the body.
    #[error(transparent)]
    Http(#[from] ureq::Error),

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates an `Other` error from a message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

// ---------------------------------------------------------------------------
// CancelReason
// ---------------------------------------------------------------------------

/// Why a queued request was discarded before any worker processed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Removed by `clear_request_queue` or `reset`.
    Cleared,
    /// Superseded by the request passed to `abort_clear_and_queue`.
    Aborted,
    /// The dispatcher was dropped while the request was still queued.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleared => write!(f, "queue cleared"),
            Self::Aborted => write!(f, "aborted"),
            Self::Shutdown => write!(f, "dispatcher shut down"),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/**
 * Every outcome other than success that a request can be reported with,
 * plus the construction failures the dispatcher itself can return.
 */
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport call failed (connect, send, read, timeout).
    #[error("Network Error: {0}")]
    Network(#[from] TransportError),

    /// The server answered with a non-2xx status.
    #[error("HTTP Error {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, forwarded verbatim.
        body: String,
    },

    /// The request was removed from the queue before being processed.
    #[error("Request cancelled: {0}")]
    Cancelled(CancelReason),

    /// A subscribe worker spent its whole retry budget.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of fetches made, the initial one included.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<DispatchError>,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DispatchError {
    /// Returns `true` for errors produced by clearing or dropping the queue.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /**
     * Returns the failure that actually ended the request, looking through
     * `RetriesExhausted`.
     */
    pub fn root(&self) -> &DispatchError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_display_names_the_cause() {
        let err = DispatchError::from(TransportError::other("connection refused"));
        assert_eq!(err.to_string(), "Network Error: connection refused");
    }

    #[test]
    fn retries_exhausted_exposes_last_failure() {
        let err = DispatchError::RetriesExhausted {
            attempts: 3,
            last: Box::new(DispatchError::Status { status: 503, body: String::new() }),
        };

        assert!(matches!(err.root(), DispatchError::Status { status: 503, .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(DispatchError::Cancelled(CancelReason::Cleared).is_cancelled());
        assert!(!DispatchError::from(TransportError::other("x")).is_cancelled());
        assert_eq!(
            DispatchError::Cancelled(CancelReason::Aborted).to_string(),
            "Request cancelled: aborted"
        );
    }
}
