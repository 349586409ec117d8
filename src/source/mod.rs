//! Event sources feeding a watcher.
//!
//! The watcher does not know how events reach it. A source hands out a single
//! [`EventSubscription`] wrapping an ordered channel; the watcher's dispatch
//! thread owns the subscription for as long as it runs and drops it on exit,
//! which releases whatever the source attached to it. Reconnection and backoff
//! are the source's business, never the watcher's.

use std::fmt;

use crossbeam_channel::Receiver;

use crate::error::WatchResult;
use crate::event::Event;

/// In-memory channel-backed source.
pub mod channel;
/// Recorded event log replay.
pub mod replay;

/// Tokio mpsc bridge.
#[cfg(feature = "async-source")]
pub mod async_bridge;

pub use channel::{ChannelSource, EventPublisher};
pub use replay::ReplaySource;

#[cfg(feature = "async-source")]
pub use async_bridge::TokioSource;

/// Something that can be subscribed to for a stream of events.
pub trait EventSource: Send {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Opens the subscription.
    ///
    /// Failing here (auth, connectivity, already consumed) is reported to the
    /// caller of [`crate::watch::EventWatcher::run`] and no dispatch thread is
    /// started.
    fn subscribe(&mut self) -> WatchResult<EventSubscription>;
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// An open subscription: events in delivery order plus a release hook.
///
/// The stream ends when every sender is dropped. Dropping the subscription
/// runs the release hook exactly once.
pub struct EventSubscription {
    rx: Receiver<Event>,
    release: Option<ReleaseHook>,
}

impl EventSubscription {
    /// Wraps a receiver with no release hook.
    #[must_use]
    pub fn new(rx: Receiver<Event>) -> Self {
        Self { rx, release: None }
    }

    /// Wraps a receiver and runs `release` when the subscription is dropped.
    #[must_use]
    pub fn with_release(rx: Receiver<Event>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub(crate) const fn receiver(&self) -> &Receiver<Event> {
        &self.rx
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("queued", &self.rx.len())
            .field("has_release_hook", &self.release.is_some())
            .finish()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
