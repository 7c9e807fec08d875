/*!
 * HTTP transport backed by `ureq`.
 *
 * Each `HttpTransport` owns its own `ureq::Agent` and therefore its own
 * connection pool; workers never share sockets.
 *
 * Notes:
 * - **Status is not interpreted here.** `http_status_as_error(false)`
 *   makes a 4xx/5xx arrive as a `Response`; the worker decides what it
 *   means.
 * - **Timeouts live in the agent config.** Changing one, or calling
 *   `reset`, swaps in a new agent. A fetch already in flight keeps the
 *   agent it started with.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};
use ureq::Agent;

use super::{Response, Transport, TransportFactory};
use crate::error::TransportError;

/**
 * Settings and the agent built from them, guarded together so a fetch
 * always sees an agent matching the headers it reads.
 */
struct State {
    connect_timeout: Duration,
    request_timeout: Duration,
    headers: HashMap<String, String>,
    agent: Agent,
}

fn build_agent(connect_timeout: Duration, request_timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_connect(Some(connect_timeout))
        .timeout_global(Some(request_timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// `ureq`-backed `Transport`. Created through `HttpTransportFactory`.
pub struct HttpTransport {
    state: Mutex<State>,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                connect_timeout,
                request_timeout,
                headers: HashMap::new(),
                agent: build_agent(connect_timeout, request_timeout),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current (connect, request) timeouts.
    pub fn timeouts(&self) -> (Duration, Duration) {
        let state = self.lock();
        (state.connect_timeout, state.request_timeout)
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, headers: &HashMap<String, String>) -> Result<Response, TransportError> {
        /*
         * Snapshot under the lock, then release it before touching the
         * network so setters never wait behind a long-poll.
         */
        let (agent, mut merged) = {
            let state = self.lock();
            (state.agent.clone(), state.headers.clone())
        };
        merged.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        trace!(url, "fetching");

        let mut request = agent.get(url);
        for (key, value) in &merged {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.call()?;
        let status = response.status().as_u16();
        let body = response.into_body().read_to_string()?;

        debug!(url, status, bytes = body.len(), "fetch completed");
        Ok(Response { status, body })
    }

    fn set_connection_timeout(&self, timeout: Duration) {
        let mut state = self.lock();
        state.connect_timeout = timeout;
        state.agent = build_agent(state.connect_timeout, state.request_timeout);
    }

    fn set_request_timeout(&self, timeout: Duration) {
        let mut state = self.lock();
        state.request_timeout = timeout;
        state.agent = build_agent(state.connect_timeout, state.request_timeout);
    }

    fn set_header(&self, key: &str, value: &str) {
        self.lock().headers.insert(key.to_string(), value.to_string());
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.agent = build_agent(state.connect_timeout, state.request_timeout);
        debug!("transport connection reset");
    }
}

/// Builds a fresh `HttpTransport` per worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(HttpTransport::new(connect_timeout, request_timeout)))
    }
}
