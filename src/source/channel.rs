use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::event::Event;

use super::{EventSource, EventSubscription};

/// In-memory source whose events are pushed through an [`EventPublisher`].
///
/// The source can be subscribed to once. Dropping every publisher ends the
/// stream, which the watcher treats like a broken subscription.
#[derive(Debug)]
pub struct ChannelSource {
    name: String,
    rx: Option<Receiver<Event>>,
    subscribed: Arc<AtomicBool>,
    fail_next: Option<String>,
}

/// Sending half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Sender<Event>,
    subscribed: Arc<AtomicBool>,
}

impl ChannelSource {
    /// Creates a source and the publisher that feeds it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, EventPublisher) {
        let (tx, rx) = unbounded::<Event>();
        let subscribed = Arc::new(AtomicBool::new(false));
        let source = Self {
            name: name.into(),
            rx: Some(rx),
            subscribed: Arc::clone(&subscribed),
            fail_next: None,
        };
        (source, EventPublisher { tx, subscribed })
    }

    /// Makes the next `subscribe` call fail with `reason`.
    ///
    /// Subsequent calls behave normally.
    #[must_use]
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_next = Some(reason.into());
        self
    }
}

impl EventSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&mut self) -> WatchResult<EventSubscription> {
        if let Some(reason) = self.fail_next.take() {
            return Err(WatchError::source_unavailable(&self.name, reason));
        }

        let Some(rx) = self.rx.take() else {
            return Err(WatchError::source_unavailable(
                &self.name,
                "subscription already consumed",
            ));
        };

        self.subscribed.store(true, Ordering::Release);
        let subscribed = Arc::clone(&self.subscribed);
        let name = self.name.clone();
        Ok(EventSubscription::with_release(rx, move || {
            subscribed.store(false, Ordering::Release);
            debug!(source = %name, "channel subscription released");
        }))
    }
}

impl EventPublisher {
    /// Publishes an event.
    ///
    /// Returns false once the subscription has been released; events published
    /// before the watcher subscribes are queued and delivered on subscribe.
    pub fn publish(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Publishes a batch, stopping at the first rejected event.
    ///
    /// Returns how many events were accepted.
    pub fn publish_all(&self, events: impl IntoIterator<Item = Event>) -> usize {
        let mut accepted = 0;
        for ev in events {
            if !self.publish(ev) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Whether a watcher currently holds the subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Number of published events not yet taken by the dispatch thread.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_once() {
        let (mut source, _publisher) = ChannelSource::new("events");
        assert!(source.subscribe().is_ok());
        let err = source.subscribe().unwrap_err();
        assert!(matches!(err, WatchError::SourceUnavailable { .. }));
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let (source, _publisher) = ChannelSource::new("events");
        let mut source = source.failing("unauthorized");
        let err = source.subscribe().unwrap_err();
        assert!(format!("{err}").contains("unauthorized"));
        assert!(source.subscribe().is_ok());
    }

    #[test]
    fn publish_fails_after_release() {
        let (mut source, publisher) = ChannelSource::new("events");
        assert!(publisher.publish(Event::new("early", "queued before subscribe")));
        let sub = source.subscribe().unwrap();
        assert!(publisher.is_subscribed());
        assert_eq!(sub.receiver().recv().unwrap().reason, "early");
        drop(sub);
        assert!(!publisher.is_subscribed());
        assert!(!publisher.publish(Event::new("late", "nobody listening")));
    }

    #[test]
    fn publish_all_counts_accepted() {
        let (mut source, publisher) = ChannelSource::new("events");
        let _sub = source.subscribe().unwrap();
        let n = publisher.publish_all((0..3).map(|i| Event::new("r", format!("m{i}"))));
        assert_eq!(n, 3);
        assert_eq!(publisher.backlog(), 3);
    }
}
