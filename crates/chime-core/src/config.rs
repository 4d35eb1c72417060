//! Scheduler configuration and its defaults.

use std::time::Duration;

/// Default lease length stamped at claim time. A crashed worker's tasks
/// become sweepable once the lease expires.
pub const DEFAULT_LEASE_MS: u64 = 10 * 60 * 1000;

/// Default window a pending task has to get claimed before it is aborted as
/// scheduling-timed-out.
pub const DEFAULT_SCHEDULING_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Tunables for one scheduler instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay between poll ticks, measured from the end of the previous pass.
    pub poll_interval: Duration,

    /// How many tasks one poll pass claims and runs concurrently.
    pub parallel: usize,

    /// Lease length for claims; `timeout_at = now + min(timeout_ms, this)`.
    pub default_lease_ms: u64,

    /// Scheduling-timeout window applied when `schedule` and follow-up
    /// inserts do not carry an explicit deadline.
    pub default_scheduling_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            parallel: 1,
            default_lease_ms: DEFAULT_LEASE_MS,
            default_scheduling_timeout_ms: DEFAULT_SCHEDULING_TIMEOUT_MS,
        }
    }
}
