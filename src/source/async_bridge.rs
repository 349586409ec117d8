use crossbeam_channel::unbounded;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::event::Event;

use super::{EventSource, EventSubscription};

/// Source fed by a tokio unbounded channel, for async watch transports.
///
/// On subscribe a forwarding task is spawned on `handle`; it moves events into
/// the watcher's subscription until either side closes. Releasing the
/// subscription aborts the task.
#[derive(Debug)]
pub struct TokioSource {
    name: String,
    handle: Handle,
    rx: Option<UnboundedReceiver<Event>>,
}

impl TokioSource {
    /// Wraps `rx`; forwarding runs on `handle` once subscribed.
    #[must_use]
    pub fn new(name: impl Into<String>, handle: Handle, rx: UnboundedReceiver<Event>) -> Self {
        Self {
            name: name.into(),
            handle,
            rx: Some(rx),
        }
    }
}

impl EventSource for TokioSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&mut self) -> WatchResult<EventSubscription> {
        let Some(mut rx) = self.rx.take() else {
            return Err(WatchError::source_unavailable(
                &self.name,
                "subscription already consumed",
            ));
        };

        let (tx, sub_rx) = unbounded::<Event>();
        let task = self.handle.spawn(async move {
            while let Some(ev) = rx.recv().await {
                if tx.send(ev).is_err() {
                    break;
                }
            }
        });

        let name = self.name.clone();
        Ok(EventSubscription::with_release(sub_rx, move || {
            task.abort();
            debug!(source = %name, "tokio forwarding task aborted");
        }))
    }
}
