//! Error types for scalewatch.
//!
//! All errors are strongly typed using thiserror. Only failures that a caller
//! can act on are surfaced here: a subscription that cannot be established,
//! lifecycle misuse, malformed selectors or replay logs, and bounded polls
//! that run out of time. Failures inside the dispatch thread are logged and
//! absorbed; they never reach a caller as an error value.

use thiserror::Error;

/// Errors produced by bounded polling of counters and other probes.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Timed out after {waited_ms}ms waiting for {description} (last observed: {last_observed})")]
    Timeout {
        waited_ms: u64,
        description: String,
        last_observed: String,
    },

    #[error("Condition '{description}' violated after {after_ms}ms (observed: {observed})")]
    Violated {
        after_ms: u64,
        description: String,
        observed: String,
    },
}

/// Top-level error type for scalewatch.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Event source '{source_name}' unavailable: {reason}")]
    SourceUnavailable {
        source_name: String,
        reason: String,
    },

    #[error("Watcher is already running")]
    AlreadyRunning,

    #[error("Watcher has been stopped")]
    Stopped,

    #[error("Invalid message pattern '{pattern}': {message}")]
    InvalidPattern {
        pattern: String,
        message: String,
    },

    #[error("Replay log line {line}: {message}")]
    Replay {
        line: usize,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Poll error: {0}")]
    Poll(#[from] PollError),
}

impl WatchError {
    /// Creates a source-unavailable error.
    #[must_use]
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error comes from calling the watcher in the wrong state.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::Stopped)
    }

    /// Returns true if a scenario cannot continue after this error.
    ///
    /// A watcher that never subscribed cannot observe anything, so every
    /// counter assertion after it would be meaningless.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. } | Self::Stopped)
    }

    /// Returns true if this is a polling timeout or violation.
    #[must_use]
    pub const fn is_poll(&self) -> bool {
        matches!(self, Self::Poll(_))
    }
}

/// Result type alias for scalewatch operations.
pub type WatchResult<T> = Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_unavailable_message() {
        let err = WatchError::source_unavailable("kube-events", "connection refused");
        let msg = format!("{err}");
        assert!(msg.contains("kube-events"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_fatal());
        assert!(!err.is_lifecycle());
    }

    #[test]
    fn test_lifecycle_errors() {
        assert!(WatchError::AlreadyRunning.is_lifecycle());
        assert!(!WatchError::AlreadyRunning.is_fatal());
        assert!(WatchError::Stopped.is_lifecycle());
        assert!(WatchError::Stopped.is_fatal());
    }

    #[test]
    fn test_poll_timeout_converts() {
        let poll = PollError::Timeout {
            waited_ms: 1500,
            description: "scale-up events".to_string(),
            last_observed: "1".to_string(),
        };
        let err: WatchError = poll.into();
        assert!(err.is_poll());
        let msg = format!("{err}");
        assert!(msg.contains("1500ms"));
        assert!(msg.contains("scale-up events"));
    }

    #[test]
    fn test_replay_error_reports_line() {
        let err = WatchError::Replay {
            line: 7,
            message: "expected value".to_string(),
        };
        assert!(format!("{err}").contains("line 7"));
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WatchError = io.into();
        assert!(matches!(err, WatchError::Io(_)));
    }
}
