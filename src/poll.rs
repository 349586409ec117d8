//! Bounded polling for scenario assertions.
//!
//! Counters move asynchronously, so assertions about them are phrased as
//! "eventually this holds within T" or "this keeps holding for T", probing at a
//! fixed interval. Every probe is logged with the time left before the deadline.

use std::fmt::Debug;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PollError;

/// Interval between probes unless overridden.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Timeout for quick checks.
pub const WAIT_SHORT: Duration = Duration::from_secs(60);
/// Timeout for a single scale-up or scale-down step.
pub const WAIT_MEDIUM: Duration = Duration::from_secs(3 * 60);
/// Timeout for waits that include node provisioning.
pub const WAIT_LONG: Duration = Duration::from_secs(15 * 60);

/// Timeout and probe interval of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Total time allowed, in milliseconds.
    pub timeout_ms: u64,
    /// Pause between probes, in milliseconds.
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::medium()
    }
}

impl PollConfig {
    /// Builds a config from durations, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout_ms: duration_ms(timeout),
            interval_ms: duration_ms(interval),
        }
    }

    /// One minute at the default interval.
    #[must_use]
    pub fn short() -> Self {
        Self::new(WAIT_SHORT, DEFAULT_POLL_INTERVAL)
    }

    /// Three minutes at the default interval.
    #[must_use]
    pub fn medium() -> Self {
        Self::new(WAIT_MEDIUM, DEFAULT_POLL_INTERVAL)
    }

    /// Fifteen minutes at the default interval.
    #[must_use]
    pub fn long() -> Self {
        Self::new(WAIT_LONG, DEFAULT_POLL_INTERVAL)
    }

    /// Total time allowed.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Probe interval; a zero interval is treated as one millisecond.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Time left until `deadline`, rounded to the nearest whole second.
#[must_use]
pub fn remaining(deadline: Instant) -> Duration {
    let left = deadline.saturating_duration_since(Instant::now());
    let secs = left.as_secs() + u64::from(left.subsec_millis() >= 500);
    Duration::from_secs(secs)
}

/// Probes until `cond` holds or the timeout elapses.
///
/// Returns the first observation satisfying `cond`. On timeout the error
/// carries the last observation.
pub fn eventually<T: Debug>(
    cfg: &PollConfig,
    description: &str,
    mut probe: impl FnMut() -> T,
    mut cond: impl FnMut(&T) -> bool,
) -> Result<T, PollError> {
    let start = Instant::now();
    let deadline = start + cfg.timeout();

    loop {
        let observed = probe();
        info!("[{}s remaining] {}; observed {:?}", remaining(deadline).as_secs(), description, observed);
        if cond(&observed) {
            return Ok(observed);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout {
                waited_ms: duration_ms(now - start),
                description: description.to_string(),
                last_observed: format!("{observed:?}"),
            });
        }
        thread::sleep(cfg.interval().min(deadline - now));
    }
}

/// Probes for the whole timeout, failing on the first observation that
/// violates `cond`.
///
/// Returns the last observation when `cond` held throughout.
pub fn consistently<T: Debug>(
    cfg: &PollConfig,
    description: &str,
    mut probe: impl FnMut() -> T,
    mut cond: impl FnMut(&T) -> bool,
) -> Result<T, PollError> {
    let start = Instant::now();
    let deadline = start + cfg.timeout();

    loop {
        let observed = probe();
        info!("[{}s remaining] {}; observed {:?}", remaining(deadline).as_secs(), description, observed);
        if !cond(&observed) {
            return Err(PollError::Violated {
                after_ms: duration_ms(start.elapsed()),
                description: description.to_string(),
                observed: format!("{observed:?}"),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(observed);
        }
        thread::sleep(cfg.interval().min(deadline - now));
    }
}
