//! Shared fixtures for dispatcher integration tests.
//!
//! `MockHub` scripts replies per URL and records every fetch and every
//! transport it hands out. `Recorder` collects handler callbacks in the order
//! they arrive.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use courier_core::{
    DispatchError, Response, ResponseHandler, Transport, TransportError, TransportFactory,
};

/// What a mock transport does for one fetch.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(&'static str),
    Status(u16),
    Fail(&'static str),
    /// Sleep, then answer 200 with the URL as body.
    Wait(Duration),
    Panic,
}

#[derive(Debug, Clone)]
pub struct Fetch {
    pub transport: usize,
    pub url: String,
    pub thread: Option<String>,
    pub at: Instant,
}

#[derive(Default)]
pub struct MockHub {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    fetches: Mutex<Vec<Fetch>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    fail_create: Mutex<bool>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues replies for `url`; once used up the URL answers 200 with itself.
    pub fn script(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn factory(self: &Arc<Self>) -> MockFactory {
        MockFactory(Arc::clone(self))
    }

    pub fn refuse_new_transports(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    pub fn fetches(&self) -> Vec<Fetch> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|f| f.url == url).count()
    }

    pub fn fetched_by(&self, url: &str) -> Vec<usize> {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.url == url)
            .map(|f| f.transport)
            .collect()
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().unwrap().clone()
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        self.replies.lock().unwrap().get_mut(url).and_then(VecDeque::pop_front)
    }
}

pub struct MockFactory(Arc<MockHub>);

impl TransportFactory for MockFactory {
    fn create(
        &self,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if *self.0.fail_create.lock().unwrap() {
            return Err(TransportError::other("no sockets left"));
        }

        let mut transports = self.0.transports.lock().unwrap();
        let transport = Arc::new(MockTransport {
            id: transports.len(),
            hub: Arc::clone(&self.0),
            connect_timeout: Mutex::new(connect_timeout),
            request_timeout: Mutex::new(request_timeout),
            headers: Mutex::new(HashMap::new()),
            resets: AtomicUsize::new(0),
        });
        transports.push(Arc::clone(&transport));
        Ok(transport)
    }
}

pub struct MockTransport {
    pub id: usize,
    hub: Arc<MockHub>,
    connect_timeout: Mutex<Duration>,
    request_timeout: Mutex<Duration>,
    headers: Mutex<HashMap<String, String>>,
    resets: AtomicUsize,
}

impl MockTransport {
    pub fn connect_timeout(&self) -> Duration {
        *self.connect_timeout.lock().unwrap()
    }

    pub fn request_timeout(&self) -> Duration {
        *self.request_timeout.lock().unwrap()
    }

    pub fn header(&self, key: &str) -> Option<String> {
        self.headers.lock().unwrap().get(key).cloned()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn fetch(&self, url: &str, _headers: &HashMap<String, String>) -> Result<Response, TransportError> {
        self.hub.fetches.lock().unwrap().push(Fetch {
            transport: self.id,
            url: url.to_string(),
            thread: thread::current().name().map(str::to_string),
            at: Instant::now(),
        });

        match self.hub.next_reply(url) {
            None => Ok(Response::new(200, url)),
            Some(Reply::Body(body)) => Ok(Response::new(200, body)),
            Some(Reply::Status(status)) => Ok(Response::new(status, "")),
            Some(Reply::Fail(message)) => Err(TransportError::other(message)),
            Some(Reply::Wait(duration)) => {
                thread::sleep(duration);
                Ok(Response::new(200, url))
            }
            Some(Reply::Panic) => panic!("mock transport exploded"),
        }
    }

    fn set_connection_timeout(&self, timeout: Duration) {
        *self.connect_timeout.lock().unwrap() = timeout;
    }

    fn set_request_timeout(&self, timeout: Duration) {
        *self.request_timeout.lock().unwrap() = timeout;
    }

    fn set_header(&self, key: &str, value: &str) {
        self.headers.lock().unwrap().insert(key.to_string(), value.to_string());
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Outcome {
    Ok(String),
    Err(DispatchError),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn error(&self) -> Option<&DispatchError> {
        match self {
            Self::Err(error) => Some(error),
            Self::Ok(_) => None,
        }
    }
}

/// Collects `(tag, outcome)` pairs in callback order.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(String, Outcome)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self, tag: &str) -> Arc<dyn ResponseHandler> {
        let seen = Arc::clone(&self.seen);
        let tag = tag.to_string();
        Arc::new(move |result: Result<String, DispatchError>| {
            let outcome = match result {
                Ok(body) => Outcome::Ok(body),
                Err(error) => Outcome::Err(error),
            };
            seen.lock().unwrap().push((tag.clone(), outcome));
        })
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Waits until at least `count` callbacks arrived; `false` on timeout.
    pub fn wait_for(&self, count: usize) -> bool {
        wait_until(Duration::from_secs(10), || self.len() >= count)
    }

    pub fn tags(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(tag, _)| tag.clone()).collect()
    }

    pub fn take(&self) -> Vec<(String, Outcome)> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    pub fn outcomes_for(&self, tag: &str) -> usize {
        self.seen.lock().unwrap().iter().filter(|(t, _)| t == tag).count()
    }
}

/// Polls `condition` every few milliseconds until it holds or `limit` passes.
pub fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
