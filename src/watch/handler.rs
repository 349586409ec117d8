//! Handler registrations and the registry the dispatch thread reads.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;
use crate::predicate::Predicate;

/// Unique identifier for a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Create a new random handler id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type ActionFn = dyn Fn(&Event) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Disabled,
    NoMatch,
    Fired,
    Faulted(String),
}

pub(crate) struct HandlerEntry {
    id: HandlerId,
    name: String,
    predicate: Predicate,
    action: Box<ActionFn>,
    enabled: AtomicBool,
    faults: AtomicU64,
}

impl HandlerEntry {
    pub(crate) fn new(name: String, predicate: Predicate, action: Box<ActionFn>) -> Self {
        Self {
            id: HandlerId::new(),
            name,
            predicate,
            action,
            enabled: AtomicBool::new(false),
            faults: AtomicU64::new(0),
        }
    }

    pub(crate) const fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Checks enablement, evaluates the predicate and runs the action.
    ///
    /// A panic in either the predicate or the action is caught and reported
    /// as `Faulted`, so one broken handler cannot take the dispatch thread down.
    pub(crate) fn dispatch(&self, event: &Event) -> DispatchOutcome {
        if !self.is_enabled() {
            return DispatchOutcome::Disabled;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if self.predicate.matches(event) {
                (self.action)(event);
                true
            } else {
                false
            }
        }));

        match result {
            Ok(true) => DispatchOutcome::Fired,
            Ok(false) => DispatchOutcome::NoMatch,
            Err(payload) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Faulted(panic_message(payload.as_ref()))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to a registered handler.
///
/// Handlers start disabled. `enable`/`disable` are idempotent, never block
/// and may be called from any thread; the dispatch thread observes the new
/// state on the next handler it considers.
#[derive(Clone)]
pub struct EventHandler {
    entry: Arc<HandlerEntry>,
}

impl EventHandler {
    pub(crate) const fn new(entry: Arc<HandlerEntry>) -> Self {
        Self { entry }
    }

    /// Arms the handler.
    pub fn enable(&self) -> &Self {
        self.entry.set_enabled(true);
        self
    }

    /// Pauses the handler.
    pub fn disable(&self) -> &Self {
        self.entry.set_enabled(false);
        self
    }

    /// Whether the handler is currently armed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.entry.is_enabled()
    }

    /// Unique id of this registration.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.entry.id()
    }

    /// Label used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// How many times the predicate or action panicked.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.entry.faults.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("id", &self.entry.id)
            .field("name", &self.entry.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Append-only handler list with a generation counter.
///
/// Writers push under the mutex; the dispatch thread re-snapshots only when
/// the generation moved, so registration never waits on a dispatch pass and a
/// dispatch pass never waits on registration.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    entries: Mutex<Vec<Arc<HandlerEntry>>>,
    generation: AtomicU64,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, entry: HandlerEntry) -> Arc<HandlerEntry> {
        let entry = Arc::new(entry);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(Arc::clone(&entry));
        self.generation.fetch_add(1, Ordering::AcqRel);
        entry
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> (u64, Vec<Arc<HandlerEntry>>) {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        (self.generation.load(Ordering::Acquire), entries.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
