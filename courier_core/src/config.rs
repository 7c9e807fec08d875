/**
 * Pool configuration.
 *
 * One `PoolConfig` describes one dispatcher. There is no process-wide
 * worker count: each pool reads its own value once, at construction.
 *
 * # Example
 * ```ignore
 * let config = PoolConfig {
 *     worker_count: 2,
 *     ..PoolConfig::non_subscribe("history")
 * };
 * ```
 */
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PoolKind
// ---------------------------------------------------------------------------

/**
 * Traffic class served by a dispatcher.
 *
 * Selects the worker behaviour, the default clear policy, and whether
 * timeout changes reach workers that are already running.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Long-poll traffic. Workers retry failed fetches; timeout changes
    /// apply from the next reset onwards.
    Subscribe,
    /// Fire-once traffic. One attempt per request; timeout changes apply
    /// immediately to every worker.
    NonSubscribe,
}

impl PoolKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::NonSubscribe => "non_subscribe",
        }
    }
}

// ---------------------------------------------------------------------------
// ClearPolicy
// ---------------------------------------------------------------------------

/// Which queued requests `clear_request_queue` cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearPolicy {
    /// Cancel every queued request.
    DropAll,
    /// Keep the most recently queued request and cancel the rest.
    KeepLatest,
}

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Default bounded wait on an empty queue before a worker re-checks its
/// death flag.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default retry budget of a subscribe worker.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default pause between subscribe retries.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5000;

/// Configuration of a single dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name. Worker threads are named `<name>-worker-<slot>`.
    pub name: String,

    /// Number of workers. Values below 1 are treated as 1.
    /// Default: `1`, which keeps delivery strictly ordered.
    pub worker_count: usize,

    /// Connect timeout handed to every new transport.
    pub connect_timeout_ms: u64,

    /// Request (read) timeout handed to every new transport.
    pub request_timeout_ms: u64,

    /// How long an idle worker waits on the queue before re-checking
    /// whether it has been told to die.
    pub poll_interval_ms: u64,

    /// Retries after the first failed fetch. Subscribe pools only.
    pub max_retries: u32,

    /// Pause between retries. Subscribe pools only.
    pub retry_interval_ms: u64,

    /// What `clear_request_queue` keeps.
    pub clear_policy: ClearPolicy,
}

impl PoolConfig {
    /// Defaults for a subscribe (long-poll) pool.
    pub fn subscribe(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_timeout_ms: 310_000,
            clear_policy: ClearPolicy::KeepLatest,
            ..Self::default()
        }
    }

    /// Defaults for a non-subscribe (fire-once) pool.
    pub fn non_subscribe(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The worker count actually used by a pool built from this config.
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "courier".into(),
            worker_count: 1,
            connect_timeout_ms: 5000,
            request_timeout_ms: 10_000,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            clear_policy: ClearPolicy::DropAll,
        }
    }
}
