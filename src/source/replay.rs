use std::fs;
use std::io::Read;
use std::path::Path;

use crossbeam_channel::unbounded;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::event::Event;

use super::{EventSource, EventSubscription};

/// Replays a recorded, finite event log.
///
/// Accepted formats:
/// - a Kubernetes `EventList` object (`{"items": [...]}`),
/// - a JSON array of events,
/// - a single event object,
/// - JSON lines, one event per line (blank lines ignored).
///
/// Every subscription delivers the full log in order and then ends. Recorded
/// events usually predate the watcher, so watchers replaying a log should
/// turn off stale-event skipping.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    events: Vec<Event>,
}

impl ReplaySource {
    /// Builds a source from already-decoded events.
    #[must_use]
    pub fn from_events(name: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Parses a log from a reader.
    pub fn from_reader(name: impl Into<String>, mut reader: impl Read) -> WatchResult<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(Self::from_events(name, parse_log(&text)?))
    }

    /// Parses a log file; the source is named after the path.
    pub fn from_path(path: impl AsRef<Path>) -> WatchResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Ok(Self::from_events(path.display().to_string(), parse_log(&text)?))
    }

    /// Recorded events, in replay order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&mut self) -> WatchResult<EventSubscription> {
        let (tx, rx) = unbounded::<Event>();
        for ev in &self.events {
            // The receiver is alive in this scope, so send cannot fail.
            let _ = tx.send(ev.clone());
        }
        debug!(source = %self.name, events = self.events.len(), "replay subscription opened");
        // Dropping `tx` here ends the stream after the last recorded event.
        Ok(EventSubscription::new(rx))
    }
}

fn parse_log(text: &str) -> WatchResult<Vec<Event>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    // A whole-document parse covers arrays, EventLists and pretty-printed
    // single objects; anything else is treated as JSON lines.
    if let Ok(doc) = serde_json::from_str::<JsonValue>(trimmed) {
        return parse_document(doc);
    }

    let mut events = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ev = serde_json::from_str::<Event>(line).map_err(|e| WatchError::Replay {
            line: idx + 1,
            message: e.to_string(),
        })?;
        events.push(ev);
    }
    Ok(events)
}

fn parse_document(doc: JsonValue) -> WatchResult<Vec<Event>> {
    let items = match doc {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => match obj.remove("items") {
            Some(JsonValue::Array(items)) => items,
            Some(_) => {
                return Err(WatchError::Replay {
                    line: 1,
                    message: "'items' must be an array".to_string(),
                })
            }
            None => vec![JsonValue::Object(obj)],
        },
        other => {
            return Err(WatchError::Replay {
                line: 1,
                message: format!("expected an event object, array or list, got {other}"),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::from_value::<Event>(item).map_err(|e| WatchError::Replay {
                line: idx + 1,
                message: format!("item {}: {e}", idx + 1),
            })
        })
        .collect()
}
