/**
 * Shared FIFO the producers push onto and the workers drain.
 *
 * Uses a `Mutex<VecDeque>` + `Condvar` pair:
 * - `push` appends under the lock and wakes one waiting worker.
 * - `pop_timeout` takes the head if there is one, otherwise waits for a
 *   wake-up for at most the poll interval. The bound is what lets an idle
 *   worker notice it has been told to die even when nothing is queued.
 * - `wake_all` is the interrupt: it takes the lock before notifying, so a
 *   worker whose death flag was set before the call cannot miss it.
 *
 * A request is only ever removed, never peeked, so each one reaches at
 * most one consumer.
 */
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::ClearPolicy;
use crate::request::Request;

struct State {
    items: VecDeque<Request>,
    closed: bool,
}

/// Blocking, unbounded FIFO of pending requests.
pub struct RequestQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /*
     * Handlers never run under this lock, so a poisoned mutex can only come
     * from a panic inside `VecDeque` itself. Keep the items rather than
     * losing the queue.
     */
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
     * Appends `request` to the tail and wakes one waiting worker.
     *
     * Never blocks beyond the lock. Returns the request back if the queue
     * has been closed so the caller can cancel it.
     */
    pub fn push(&self, request: Request) -> Result<(), Request> {
        let mut state = self.lock();
        if state.closed {
            return Err(request);
        }
        state.items.push_back(request);
        self.available.notify_one();
        Ok(())
    }

    /**
     * Removes and returns the head request.
     *
     * If the queue is empty, waits up to `interval` for a push or a
     * `wake_all`. Returns `None` when the wait ends with nothing to take
     * or as soon as `stop` is observed set.
     */
    pub fn pop_timeout(&self, interval: Duration, stop: &AtomicBool) -> Option<Request> {
        let state = self.lock();
        let (mut state, _timeout) = self
            .available
            .wait_timeout_while(state, interval, |s| {
                s.items.is_empty() && !s.closed && !stop.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if stop.load(Ordering::Acquire) {
            return None;
        }
        state.items.pop_front()
    }

    /**
     * Sets a worker's death flag under the queue lock. `pop_timeout` reads
     * the flag under the same lock, so a worker that was handed a request
     * took it while still alive and processes it; a worker that sees the
     * flag never takes another one.
     */
    pub fn raise(&self, flag: &AtomicBool) {
        let _state = self.lock();
        flag.store(true, Ordering::Release);
    }

    /// Wakes every waiting worker so each re-checks its death flag.
    pub fn wake_all(&self) {
        let _state = self.lock();
        self.available.notify_all();
    }

    /**
     * Removes the requests selected by `policy` and returns them in queue
     * order. The caller is responsible for cancelling them, outside the
     * lock.
     */
    pub fn drain(&self, policy: ClearPolicy) -> Vec<Request> {
        let mut state = self.lock();
        match policy {
            ClearPolicy::DropAll => state.items.drain(..).collect(),
            ClearPolicy::KeepLatest => {
                let keep = state.items.len().saturating_sub(1);
                state.items.drain(..keep).collect()
            }
        }
    }

    /**
     * Closes the queue: later pushes are refused and every worker is woken.
     * Returns whatever was still queued.
     */
    pub fn close(&self) -> Vec<Request> {
        let mut state = self.lock();
        state.closed = true;
        self.available.notify_all();
        state.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
