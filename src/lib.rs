//! # scalewatch - Event observation and counting for autoscaler e2e tests
//!
//! scalewatch consumes an ordered stream of cluster status events, matches each
//! one against dynamically registered predicates and keeps thread-safe counters
//! that test assertions poll while the cluster scales.
//!
//! ## Core Concepts
//!
//! - **Event**: A cluster-emitted status record (component, reason, object, message)
//! - **EventSource**: Where events come from; opened once per watcher
//! - **Predicate**: A pure boolean test over a single event
//! - **EventWatcher**: Owns the source and a dispatch thread that invokes enabled handlers in order
//! - **EventCounter**: A handler that folds matching events into a number
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scalewatch::{autoscaler, ChannelSource, EventWatcher, PollConfig};
//!
//! let (source, publisher) = ChannelSource::new("events");
//! let watcher = EventWatcher::new(source);
//! watcher.run()?;
//!
//! autoscaler::log_autoscaler_events(&watcher);
//! let scale_up = autoscaler::scale_up_counter(&watcher, 0, ["ns/ms-a", "ns/ms-b"]);
//! scale_up.enable();
//!
//! // ... drive the cluster, feed `publisher` from the event transport ...
//! scale_up.wait_for(2, &PollConfig::long())?;
//! watcher.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Cluster-autoscaler predicates, counters and event logging.
pub mod autoscaler;
/// Error types.
pub mod error;
/// The event record.
pub mod event;
/// Bounded polling helpers.
pub mod poll;
/// Event predicates and selectors.
pub mod predicate;
/// Event sources.
pub mod source;
/// Watcher, handlers and counters.
pub mod watch;

pub use error::{PollError, WatchError, WatchResult};
pub use event::Event;
pub use poll::{consistently, eventually, remaining, PollConfig};
pub use predicate::{match_any, EventSelector, Predicate};
pub use source::{ChannelSource, EventPublisher, EventSource, EventSubscription, ReplaySource};
#[cfg(feature = "async-source")]
pub use source::TokioSource;
pub use watch::{
    Combine, CounterPhase, DistinctKeys, EventCounter, EventHandler, EventWatcher, HandlerId, Increment,
    WatcherConfig, WatcherStats,
};
