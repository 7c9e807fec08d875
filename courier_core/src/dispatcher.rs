/**
 * The dispatcher: one queue, a fixed set of workers, and the operations
 * that manage them.
 *
 * Lifecycle:
 * 1. `Dispatcher::new` (or `subscribe` / `non_subscribe`) creates a
 *    transport per worker through the `TransportFactory` and starts every
 *    worker thread. The worker count never changes afterwards.
 * 2. Producers call `queue` from any thread. It never blocks on workers
 *    and never rejects: backpressure is the caller's business.
 * 3. Administrative calls (`reset_workers`, `clear_request_queue`,
 *    `abort_clear_and_queue`, `stop`, configuration setters) can run
 *    concurrently with producers; only the queue lock is shared with them.
 * 4. Dropping the dispatcher kills its workers and cancels whatever is
 *    still queued, so every request hears back exactly once.
 *
 * Subscribe and non-subscribe pools are the same type; `PoolKind` decides
 * the worker behaviour, the default clear policy, and whether timeout
 * changes reach workers that are already running.
 */
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::{duration_ms, ClearPolicy, PoolConfig, PoolKind};
use crate::error::{CancelReason, Result};
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::transport::TransportFactory;
use crate::worker::{Behavior, RetryPolicy, WorkerHandle, WorkerSpec};

/// Values every newly created transport starts from.
struct Settings {
    connect_timeout: Duration,
    request_timeout: Duration,
    headers: Vec<(String, String)>,
}

/// A pool of workers draining one FIFO queue of requests.
pub struct Dispatcher {
    name: String,
    kind: PoolKind,
    queue: Arc<RequestQueue>,
    factory: Arc<dyn TransportFactory>,
    workers: Mutex<Vec<WorkerHandle>>,
    settings: Mutex<Settings>,
    retry: Arc<RetryPolicy>,
    poll_interval: Duration,
    clear_policy: ClearPolicy,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    /**
     * Builds a pool of `config.worker_count` workers (at least one) and
     * starts them.
     *
     * # Returns
     * `Err` if a transport could not be created or a thread could not be
     * spawned. Workers started before the failure are shut down again.
     */
    pub fn new(kind: PoolKind, config: PoolConfig, factory: impl TransportFactory + 'static) -> Result<Self> {
        let count = config.effective_worker_count();

        let dispatcher = Self {
            name: config.name.clone(),
            kind,
            queue: Arc::new(RequestQueue::new()),
            factory: Arc::new(factory),
            workers: Mutex::new(Vec::with_capacity(count)),
            settings: Mutex::new(Settings {
                connect_timeout: config.connect_timeout(),
                request_timeout: config.request_timeout(),
                headers: Vec::new(),
            }),
            retry: Arc::new(RetryPolicy::new(config.max_retries, config.retry_interval())),
            poll_interval: config.poll_interval(),
            clear_policy: config.clear_policy,
        };

        for slot in 0..count {
            let worker = dispatcher.spawn_worker(slot)?;
            lock(&dispatcher.workers).push(worker);
        }

        info!(pool = %dispatcher.name, kind = kind.label(), workers = count, "dispatcher started");
        Ok(dispatcher)
    }

    /// A long-poll pool whose workers retry failed fetches.
    pub fn subscribe(config: PoolConfig, factory: impl TransportFactory + 'static) -> Result<Self> {
        Self::new(PoolKind::Subscribe, config, factory)
    }

    /// A fire-once pool whose workers make a single attempt per request.
    pub fn non_subscribe(config: PoolConfig, factory: impl TransportFactory + 'static) -> Result<Self> {
        Self::new(PoolKind::NonSubscribe, config, factory)
    }

    fn behavior(&self) -> Behavior {
        match self.kind {
            PoolKind::Subscribe => Behavior::Retrying(Arc::clone(&self.retry)),
            PoolKind::NonSubscribe => Behavior::Plain,
        }
    }

    /**
     * Creates a transport from the current settings (timeouts plus every
     * header set so far) and starts a worker on it.
     */
    fn spawn_worker(&self, slot: usize) -> Result<WorkerHandle> {
        let (connect_timeout, request_timeout, headers) = {
            let settings = lock(&self.settings);
            (settings.connect_timeout, settings.request_timeout, settings.headers.clone())
        };

        let transport = self.factory.create(connect_timeout, request_timeout)?;
        for (key, value) in &headers {
            transport.set_header(key, value);
        }

        WorkerHandle::spawn(WorkerSpec {
            name: format!("{}-worker-{slot}", self.name),
            queue: Arc::clone(&self.queue),
            transport,
            behavior: self.behavior(),
            poll_interval: self.poll_interval,
        })
    }

    // -----------------------------------------------------------------------
    // Queueing
    // -----------------------------------------------------------------------

    /// Appends `request` to the queue and wakes an idle worker.
    pub fn queue(&self, request: Request) {
        trace!(pool = %self.name, url = request.url(), "queueing request");
        if let Err(request) = self.queue.push(request) {
            request.cancel(CancelReason::Shutdown);
        }
    }

    /**
     * Cancels the queued requests selected by this pool's clear policy,
     * each with `CancelReason::Cleared`.
     *
     * Non-subscribe pools drop everything; subscribe pools keep the most
     * recently queued request. Requests already being processed are not
     * affected.
     *
     * # Returns
     * The number of requests cancelled.
     */
    pub fn clear_request_queue(&self) -> usize {
        let cleared = self.queue.drain(self.clear_policy);
        let count = cleared.len();
        for request in cleared {
            request.cancel(CancelReason::Cleared);
        }
        if count > 0 {
            info!(pool = %self.name, cleared = count, "request queue cleared");
        }
        count
    }

    // -----------------------------------------------------------------------
    // Worker lifecycle
    // -----------------------------------------------------------------------

    /**
     * Replaces every worker with a fresh one on a fresh transport and
     * thread. Used after a connectivity failure to discard workers that may
     * be stuck on a broken connection.
     *
     * Each replacement is started before the old worker is killed (die +
     * interrupt). An old worker blocked in a fetch finishes that fetch,
     * reports it, and exits without taking more work.
     *
     * # Returns
     * `Err` if a replacement could not be created; that slot and the ones
     * after it keep their current workers.
     */
    pub fn reset_workers(&self) -> Result<()> {
        let mut workers = lock(&self.workers);

        for slot in 0..workers.len() {
            let replacement = self.spawn_worker(slot)?;
            let retired = std::mem::replace(&mut workers[slot], replacement);
            retired.kill();
            debug!(pool = %self.name, worker = retired.name(), "worker replaced");
        }

        info!(pool = %self.name, workers = workers.len(), "workers reset");
        Ok(())
    }

    /// Drops and reopens every worker's connection without replacing the workers.
    pub fn reset_connections(&self) {
        for worker in lock(&self.workers).iter() {
            worker.transport().reset();
        }
        debug!(pool = %self.name, "worker connections reset");
    }

    /// Clears the queue, then resets every worker.
    pub fn reset(&self) -> Result<()> {
        self.clear_request_queue();
        self.reset_workers()
    }

    /**
     * Recovers from a bad state while still delivering the newest request:
     * cancels everything queued (`CancelReason::Aborted`), resets every
     * worker, then queues `request`.
     *
     * `request` is queued even if the reset fails, in which case the
     * surviving workers pick it up and the error is returned.
     */
    pub fn abort_clear_and_queue(&self, request: Request) -> Result<()> {
        for stale in self.queue.drain(ClearPolicy::DropAll) {
            stale.cancel(CancelReason::Aborted);
        }

        let reset = self.reset_workers();
        if let Err(ref error) = reset {
            warn!(pool = %self.name, %error, "worker reset failed during abort; queueing anyway");
        }

        self.queue(request);
        reset
    }

    /**
     * Tells every worker to die without interrupting it. In-flight requests
     * finish; idle workers exit on their next poll. Requests left in the
     * queue stay there until a reset starts new workers or the dispatcher
     * is dropped.
     */
    pub fn stop(&self) {
        for worker in lock(&self.workers).iter() {
            worker.die();
        }
        info!(pool = %self.name, "dispatcher stopping");
    }

    /**
     * Kills every worker and waits up to `timeout` for all worker threads
     * to exit.
     *
     * The worker list is only locked while the kills are sent, not during
     * the wait, so configuration calls are not held up by a slow fetch.
     *
     * # Returns
     * `true` if every thread exited in time. A worker blocked in a fetch
     * only exits once its transport returns.
     */
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let exits: Vec<_> = lock(&self.workers)
            .iter()
            .map(|worker| {
                worker.kill();
                worker.exit_signal()
            })
            .collect();

        let exited = exits.iter().all(|exit| exit.wait(deadline));
        if exited {
            info!(pool = %self.name, "dispatcher shut down");
        } else {
            warn!(
                pool = %self.name,
                timeout_ms = duration_ms(timeout),
                "shutdown timed out with workers still running"
            );
        }
        exited
    }

    // -----------------------------------------------------------------------
    // Configuration fan-out
    // -----------------------------------------------------------------------

    /**
     * Sets a header on every worker's transport and remembers it for the
     * transports created by later resets.
     */
    pub fn set_header(&self, key: &str, value: &str) {
        {
            let mut settings = lock(&self.settings);
            match settings.headers.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => *existing = value.to_string(),
                None => settings.headers.push((key.to_string(), value.to_string())),
            }
        }

        for worker in lock(&self.workers).iter() {
            worker.transport().set_header(key, value);
        }
    }

    /**
     * Sets the connect timeout for new transports. Non-subscribe pools also
     * apply it to every running worker; subscribe pools pick it up at the
     * next reset.
     */
    pub fn set_connection_timeout(&self, timeout: Duration) {
        lock(&self.settings).connect_timeout = timeout;

        if self.kind == PoolKind::NonSubscribe {
            for worker in lock(&self.workers).iter() {
                worker.transport().set_connection_timeout(timeout);
            }
        }
    }

    /// Sets the request timeout; propagation follows `set_connection_timeout`.
    pub fn set_request_timeout(&self, timeout: Duration) {
        lock(&self.settings).request_timeout = timeout;

        if self.kind == PoolKind::NonSubscribe {
            for worker in lock(&self.workers).iter() {
                worker.transport().set_request_timeout(timeout);
            }
        }
    }

    /// Retries after a failed fetch, for every current and future worker.
    /// Ignored by non-subscribe pools.
    pub fn set_max_retries(&self, max_retries: u32) {
        self.retry.set_max_retries(max_retries);
    }

    /// Pause between retries. Ignored by non-subscribe pools.
    pub fn set_retry_interval(&self, interval: Duration) {
        self.retry.set_retry_interval(interval);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Requests queued and not yet taken by a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Thread ids of the current workers, in slot order.
    pub fn worker_threads(&self) -> Vec<ThreadId> {
        lock(&self.workers).iter().map(WorkerHandle::thread_id).collect()
    }

    pub fn connection_timeout(&self) -> Duration {
        lock(&self.settings).connect_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        lock(&self.settings).request_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries()
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry.retry_interval()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for worker in lock(&self.workers).iter() {
            worker.kill();
        }

        let leftover = self.queue.close();
        if !leftover.is_empty() {
            debug!(pool = %self.name, cancelled = leftover.len(), "cancelling queued requests on drop");
        }
        for request in leftover {
            request.cancel(CancelReason::Shutdown);
        }
    }
}
