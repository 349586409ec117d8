//! Watch subsystem: handler registrations, the dispatch thread and counters.
//!
//! A watcher consumes one event source on a dedicated thread. Handlers and
//! counters registered on it start disabled and are armed separately, so a
//! scenario can set everything up before anything is counted.

/// Event counters and combine policies.
pub mod counter;
/// Handler registrations.
pub mod handler;
/// Watcher lifecycle and dispatch loop.
pub mod watcher;

pub use counter::{Combine, CounterPhase, DistinctKeys, EventCounter, Increment};
pub use handler::{EventHandler, HandlerId};
pub use watcher::{EventWatcher, WatcherConfig, WatcherStats};
