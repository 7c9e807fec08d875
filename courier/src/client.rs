/**
 * The courier client — owns one subscribe pool and one non-subscribe pool
 * and routes requests between them.
 *
 * Lifecycle:
 * 1. `Client::new(options)` builds both dispatchers over the HTTP
 *    transport (or `with_transport` over any other) and starts their
 *    workers.
 * 2. `subscribe` / `request` queue work on the matching pool from any
 *    thread.
 * 3. `network_changed` replaces every worker in both pools after a
 *    connectivity change.
 * 4. Dropping the client shuts both pools down, waiting up to
 *    `shutdown_timeout_ms` for worker threads to exit.
 */
use std::collections::BTreeMap;
use std::time::Duration;

use courier_core::{
    Dispatcher, HttpTransportFactory, PoolConfig, Request, Result, TransportFactory,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ClientOptions
// ---------------------------------------------------------------------------

/**
 * Configuration for a `Client`.
 *
 * Implements `From<&str>` so a label alone is enough; the label names both
 * pools and therefore every worker thread.
 *
 * # Example
 * ```ignore
 * let client = courier::Client::new(courier::ClientOptions {
 *     headers: [("V".into(), "3.4".into())].into(),
 *     ..courier::ClientOptions::from("pubsub")
 * })?;
 * ```
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Long-poll pool. Default: one retrying worker.
    pub subscribe: PoolConfig,

    /// Fire-once pool. Default: one worker, so calls complete in order.
    pub non_subscribe: PoolConfig,

    /// Headers set on every worker of both pools.
    pub headers: BTreeMap<String, String>,

    /// How long dropping the client waits for worker threads to exit.
    /// Default: `2000`.
    pub shutdown_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from("courier")
    }
}

impl From<&str> for ClientOptions {
    fn from(label: &str) -> Self {
        Self {
            subscribe: PoolConfig::subscribe(format!("{label}-subscribe")),
            non_subscribe: PoolConfig::non_subscribe(format!("{label}-api")),
            headers: BTreeMap::new(),
            shutdown_timeout_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A subscribe pool and a non-subscribe pool behind one handle.
pub struct Client {
    subscribe: Dispatcher,
    non_subscribe: Dispatcher,
    shutdown_timeout: Duration,
}

impl Client {
    /// Builds both pools over the `ureq` HTTP transport.
    pub fn new(options: impl Into<ClientOptions>) -> Result<Self> {
        Self::with_transport(options, HttpTransportFactory)
    }

    /**
     * Builds both pools over `factory`, which is cloned once per pool.
     *
     * # Returns
     * `Err` if either pool fails to start; a pool that did start is shut
     * down again.
     */
    pub fn with_transport(
        options: impl Into<ClientOptions>,
        factory: impl TransportFactory + Clone + 'static,
    ) -> Result<Self> {
        let options = options.into();

        let subscribe = Dispatcher::subscribe(options.subscribe, factory.clone())?;
        let non_subscribe = Dispatcher::non_subscribe(options.non_subscribe, factory)?;

        for (key, value) in &options.headers {
            subscribe.set_header(key, value);
            non_subscribe.set_header(key, value);
        }

        info!(
            subscribe = subscribe.name(),
            non_subscribe = non_subscribe.name(),
            "client started"
        );

        Ok(Self {
            subscribe,
            non_subscribe,
            shutdown_timeout: Duration::from_millis(options.shutdown_timeout_ms),
        })
    }

    /// Queues a long-poll request on the subscribe pool.
    pub fn subscribe(&self, request: Request) {
        self.subscribe.queue(request);
    }

    /// Queues a one-shot request on the non-subscribe pool.
    pub fn request(&self, request: Request) {
        self.non_subscribe.queue(request);
    }

    /**
     * Replaces the pending subscribe state with `request`: cancels every
     * queued subscribe request, resets the subscribe workers, and queues
     * `request`.
     */
    pub fn resubscribe(&self, request: Request) -> Result<()> {
        self.subscribe.abort_clear_and_queue(request)
    }

    /**
     * Recovers from a connectivity change: every worker of both pools is
     * replaced by one on a fresh connection. Queued requests are kept.
     */
    pub fn network_changed(&self) -> Result<()> {
        info!("network changed; resetting workers");
        self.subscribe.reset_workers()?;
        self.non_subscribe.reset_workers()
    }

    pub fn set_header(&self, key: &str, value: &str) {
        self.subscribe.set_header(key, value);
        self.non_subscribe.set_header(key, value);
    }

    /// Applies to both pools; the subscribe pool picks it up at its next reset.
    pub fn set_connection_timeout(&self, timeout: Duration) {
        self.subscribe.set_connection_timeout(timeout);
        self.non_subscribe.set_connection_timeout(timeout);
    }

    /// Applies to both pools; the subscribe pool picks it up at its next reset.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.subscribe.set_request_timeout(timeout);
        self.non_subscribe.set_request_timeout(timeout);
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.subscribe.set_max_retries(max_retries);
    }

    pub fn set_retry_interval(&self, interval: Duration) {
        self.subscribe.set_retry_interval(interval);
    }

    pub fn subscribe_pool(&self) -> &Dispatcher {
        &self.subscribe
    }

    pub fn non_subscribe_pool(&self) -> &Dispatcher {
        &self.non_subscribe
    }

    /**
     * Kills every worker of both pools and waits for their threads, up to
     * the configured shutdown timeout per pool.
     *
     * # Returns
     * `true` if every worker exited in time.
     */
    pub fn shutdown(&self) -> bool {
        let subscribe = self.subscribe.shutdown(self.shutdown_timeout);
        let non_subscribe = self.non_subscribe.shutdown(self.shutdown_timeout);
        subscribe && non_subscribe
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.shutdown() {
            warn!("shutdown timed out; some workers are still finishing a fetch");
        }
    }
}
