/**
 * Worker threads that drain a dispatcher's queue.
 *
 * Architecture overview:
 *
 * ```text
 *  ┌──────────────┐   push    ┌──────────────┐   pop_timeout   ┌───────────┐
 *  │  Producers   │ ────────► │ RequestQueue │ ◄────────────── │  Worker   │ ×N
 *  │ (any thread) │           └──────────────┘                 └─────┬─────┘
 *  └──────────────┘                                                  │
 *                                                       Transport::fetch (owned)
 *                                                                    │
 *                                                       ResponseHandler callback
 * ```
 *
 * Each worker owns one transport and one OS thread. It loops:
 * wait (bounded) → take a request → fetch → report → repeat, until its
 * death flag is observed. A dead worker is never restarted; the dispatcher
 * builds a new one in its slot.
 *
 * Two behaviours share the loop:
 * - `Plain`: one fetch per request (non-subscribe traffic).
 * - `Retrying`: up to `max_retries` further fetches, `retry_interval`
 *   apart, before reporting failure (subscribe / long-poll traffic).
 *
 * Cancellation is cooperative. `die` sets the flag; `interrupt` wakes the
 * queue wait and the retry backoff so the flag is seen at once rather than
 * after the next poll interval. A fetch already on the wire is never cut
 * short; only the transport's own timeout ends it.
 */
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::config::duration_ms;
use crate::error::{DispatchError, TransportError};
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/**
 * Retry settings shared by every worker of a subscribe pool, including the
 * replacements created by a reset. Updated through the dispatcher at any
 * time; a worker reads the current values at each failed attempt.
 */
#[derive(Debug)]
pub struct RetryPolicy {
    max_retries: AtomicU32,
    retry_interval_ms: AtomicU64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries: AtomicU32::new(max_retries),
            retry_interval_ms: AtomicU64::new(duration_ms(retry_interval)),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::Relaxed)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.max_retries.store(max_retries, Ordering::Relaxed);
    }

    pub fn set_retry_interval(&self, interval: Duration) {
        self.retry_interval_ms.store(duration_ms(interval), Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// How a worker processes one request.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Plain,
    Retrying(Arc<RetryPolicy>),
}

// ---------------------------------------------------------------------------
// WorkerSpec / WorkerHandle
// ---------------------------------------------------------------------------

/// Everything needed to start one worker.
pub(crate) struct WorkerSpec {
    pub name: String,
    pub queue: Arc<RequestQueue>,
    pub transport: Arc<dyn Transport>,
    pub behavior: Behavior,
    pub poll_interval: Duration,
}

/**
 * The dispatcher's side of a running worker.
 *
 * Holds the death flag, the interrupt line, a reference to the worker's
 * transport (for configuration fan-out), and the thread itself.
 */
pub(crate) struct WorkerHandle {
    name: String,
    dead: Arc<AtomicBool>,
    interrupt: Sender<()>,
    queue: Arc<RequestQueue>,
    transport: Arc<dyn Transport>,
    thread: JoinHandle<()>,
    exited: ExitSignal,
}

/**
 * Disconnects exactly when a worker thread has finished. Never sent on: the
 * worker thread owns the matching sender.
 *
 * Cloned out of the handle so a caller can wait for the exit without
 * holding the dispatcher's worker list.
 */
#[derive(Clone)]
pub(crate) struct ExitSignal(Receiver<()>);

impl ExitSignal {
    /// Blocks until the thread has exited or `deadline` passes.
    pub(crate) fn wait(&self, deadline: Instant) -> bool {
        matches!(
            self.0.recv_deadline(deadline),
            Ok(()) | Err(RecvTimeoutError::Disconnected)
        )
    }
}

impl WorkerHandle {
    /**
     * Starts a worker on a new named thread.
     *
     * # Returns
     * The handle, or `DispatchError::Spawn` if the OS refused the thread.
     */
    pub(crate) fn spawn(spec: WorkerSpec) -> Result<Self, DispatchError> {
        let dead = Arc::new(AtomicBool::new(false));
        let (interrupt, interrupts) = crossbeam_channel::bounded(1);
        let (exit_guard, exited) = crossbeam_channel::bounded::<()>(0);

        let worker = Worker {
            name: spec.name.clone(),
            queue: Arc::clone(&spec.queue),
            transport: Arc::clone(&spec.transport),
            dead: Arc::clone(&dead),
            interrupts,
            behavior: spec.behavior,
            poll_interval: spec.poll_interval,
        };

        let thread = thread::Builder::new()
            .name(spec.name.clone())
            .spawn(move || {
                let _exit_guard = exit_guard;
                worker.run();
            })
            .map_err(DispatchError::Spawn)?;

        Ok(Self {
            name: spec.name,
            dead,
            interrupt,
            queue: spec.queue,
            transport: spec.transport,
            thread,
            exited: ExitSignal(exited),
        })
    }

    /**
     * Sets the death flag. Does not wake the worker: an idle worker notices
     * on its next poll, a busy one after its current request.
     */
    pub(crate) fn die(&self) {
        self.queue.raise(&self.dead);
    }

    /// Wakes the worker out of its queue wait or retry backoff.
    pub(crate) fn interrupt(&self) {
        // A full channel already carries a pending interrupt.
        let _ = self.interrupt.try_send(());
        self.queue.wake_all();
    }

    /// `die` followed by `interrupt`.
    pub(crate) fn kill(&self) {
        self.die();
        self.interrupt();
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    pub(crate) fn exit_signal(&self) -> ExitSignal {
        self.exited.clone()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Worker (thread body)
// ---------------------------------------------------------------------------

struct Worker {
    name: String,
    queue: Arc<RequestQueue>,
    transport: Arc<dyn Transport>,
    dead: Arc<AtomicBool>,
    interrupts: Receiver<()>,
    behavior: Behavior,
    poll_interval: Duration,
}

impl Worker {
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn run(self) {
        debug!(worker = %self.name, "worker started");

        while !self.is_dead() {
            let Some(request) = self.queue.pop_timeout(self.poll_interval, &self.dead) else {
                continue;
            };

            /*
             * `process` reports transport failures through the handler, so
             * the only thing that can unwind here is a panicking handler.
             * Catch it so one bad callback doesn't silently kill the thread.
             */
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(request)));
            if outcome.is_err() {
                error!(worker = %self.name, "response handler panicked; worker continues");
            }
        }

        debug!(worker = %self.name, "worker stopped");
    }

    fn process(&self, request: Request) {
        let result = match &self.behavior {
            Behavior::Plain => self.fetch(&request),
            Behavior::Retrying(policy) => self.fetch_with_retry(&request, policy),
        };

        if let Err(ref error) = result {
            debug!(worker = %self.name, url = request.url(), %error, "request failed");
        }
        request.respond(result);
    }

    /**
     * One fetch, with the status interpreted: 2xx is success, anything
     * else is `DispatchError::Status`. A panicking transport counts as a
     * network failure so the request still gets its callback.
     */
    fn fetch(&self, request: &Request) -> Result<String, DispatchError> {
        let response = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transport.fetch(request.url(), request.headers())
        }))
        .unwrap_or_else(|_| Err(TransportError::other("transport panicked during fetch")))?;

        if response.is_success() {
            Ok(response.body)
        } else {
            Err(DispatchError::Status {
                status: response.status,
                body: response.body,
            })
        }
    }

    fn fetch_with_retry(&self, request: &Request, policy: &RetryPolicy) -> Result<String, DispatchError> {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match self.fetch(request) {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if self.is_dead() {
                return Err(error);
            }

            if attempts > policy.max_retries() {
                return Err(DispatchError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                });
            }

            let interval = policy.retry_interval();
            warn!(
                worker = %self.name,
                url = request.url(),
                attempt = attempts,
                retry_in_ms = duration_ms(interval),
                %error,
                "fetch failed; retrying"
            );

            if self.backoff(interval) {
                return Err(error);
            }
        }
    }

    /**
     * Sleeps for `interval` unless interrupted.
     *
     * Returns `true` if the worker should give up: it was interrupted, its
     * handle is gone, or its death flag was set while it slept. This is
     * cancellation, not failure; the caller reports the pending error.
     */
    fn backoff(&self, interval: Duration) -> bool {
        match self.interrupts.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => self.is_dead(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = %self.name, "retry backoff interrupted");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::request::ResponseHandler;
    use crate::transport::Response;

    /// Transport answering from a fixed script, then with 200 "done".
    struct Scripted {
        script: Mutex<Vec<Result<Response, TransportError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<Response, TransportError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self { script: Mutex::new(script), calls: AtomicU32::new(0) })
        }
    }

    impl Transport for Scripted {
        fn fetch(&self, _url: &str, _headers: &HashMap<String, String>) -> Result<Response, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or_else(|| Ok(Response::new(200, "done")))
        }
        fn set_connection_timeout(&self, _timeout: Duration) {}
        fn set_request_timeout(&self, _timeout: Duration) {}
        fn set_header(&self, _key: &str, _value: &str) {}
        fn reset(&self) {}
    }

    fn spawn(transport: Arc<Scripted>, behavior: Behavior) -> (Arc<RequestQueue>, WorkerHandle) {
        let queue = Arc::new(RequestQueue::new());
        let handle = WorkerHandle::spawn(WorkerSpec {
            name: "test-worker-0".into(),
            queue: Arc::clone(&queue),
            transport,
            behavior,
            poll_interval: Duration::from_millis(20),
        })
        .unwrap();
        (queue, handle)
    }

    fn recorded() -> (Arc<Mutex<Vec<Result<String, String>>>>, Arc<dyn ResponseHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = Arc::new(move |result: Result<String, DispatchError>| {
            sink.lock().unwrap().push(result.map_err(|e| e.to_string()));
        });
        (seen, handler)
    }

    fn wait_for(seen: &Mutex<Vec<Result<String, String>>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn non_2xx_is_reported_as_status_error() {
        let transport = Scripted::new(vec![Ok(Response::new(403, "{\"error\":true}"))]);
        let (queue, handle) = spawn(transport, Behavior::Plain);
        let (seen, handler) = recorded();

        queue.push(Request::new("http://x/").with_handler(handler)).unwrap();
        wait_for(&seen, 1);

        assert_eq!(*seen.lock().unwrap(), vec![Err("HTTP Error 403".to_string())]);
        handle.kill();
    }

    #[test]
    fn retrying_worker_spends_budget_before_failing() {
        let transport = Scripted::new(vec![
            Err(TransportError::other("a")),
            Err(TransportError::other("b")),
            Err(TransportError::other("c")),
        ]);
        let policy = Arc::new(RetryPolicy::new(2, Duration::from_millis(10)));
        let (queue, handle) = spawn(Arc::clone(&transport), Behavior::Retrying(policy));
        let (seen, handler) = recorded();

        queue.push(Request::new("http://x/").with_handler(handler)).unwrap();
        wait_for(&seen, 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].as_ref().unwrap_err().starts_with("retries exhausted after 3 attempts"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        handle.kill();
    }

    #[test]
    fn kill_interrupts_retry_backoff() {
        let transport = Scripted::new(vec![Err(TransportError::other("down"))]);
        let policy = Arc::new(RetryPolicy::new(5, Duration::from_secs(60)));
        let (queue, handle) = spawn(Arc::clone(&transport), Behavior::Retrying(policy));
        let (seen, handler) = recorded();

        queue.push(Request::new("http://x/").with_handler(handler)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        handle.kill();
        assert!(handle.exit_signal().wait(Instant::now() + Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), vec![Err("Network Error: down".to_string())]);
    }

    #[test]
    fn idle_worker_exits_promptly_after_kill() {
        let (_queue, handle) = spawn(Scripted::new(Vec::new()), Behavior::Plain);

        let started = Instant::now();
        handle.kill();
        assert!(handle.exit_signal().wait(started + Duration::from_secs(5)));
        assert_eq!(handle.name(), "test-worker-0");
    }

    #[test]
    fn dead_worker_takes_nothing_from_the_queue() {
        let transport = Scripted::new(Vec::new());
        let (queue, handle) = spawn(Arc::clone(&transport), Behavior::Plain);

        handle.kill();
        assert!(handle.exit_signal().wait(Instant::now() + Duration::from_secs(5)));

        queue.push(Request::new("http://x/late")).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(queue.len(), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retry_policy_updates_are_visible() {
        let policy = RetryPolicy::new(5, Duration::from_secs(5));
        policy.set_max_retries(1);
        policy.set_retry_interval(Duration::from_millis(250));

        assert_eq!(policy.max_retries(), 1);
        assert_eq!(policy.retry_interval(), Duration::from_millis(250));
    }
}
