//! Event watcher and dispatch thread.
//!
//! The watcher owns the source subscription and the handler registry. `run`
//! spawns one named thread that reads events in delivery order and offers each
//! one to every enabled handler in registration order, synchronously, before
//! reading the next. Everything else (registering handlers, toggling them,
//! reading counters) happens on caller threads and never waits on dispatch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use chrono::{DateTime, SubsecRound, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::error::{WatchError, WatchResult};
use crate::event::Event;
use crate::predicate::Predicate;
use crate::source::{EventSource, EventSubscription};

use super::handler::{DispatchOutcome, EventHandler, HandlerEntry, HandlerRegistry};

/// Watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Name of the dispatch thread.
    pub thread_name: String,
    /// Drop events whose creation timestamp predates `run()`.
    ///
    /// A list-watch replays the events already stored in the cluster when it
    /// syncs; those describe activity from before the scenario started.
    pub skip_stale_events: bool,
    /// Disable a handler after its predicate or action panics.
    pub disable_faulting_handlers: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "scalewatch-dispatch".to_string(),
            skip_stale_events: true,
            disable_faulting_handlers: false,
        }
    }
}

/// Point-in-time copy of the watcher's dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
    /// Events read from the subscription.
    pub received: u64,
    /// Events dropped by stale-event filtering.
    pub stale_skipped: u64,
    /// Handler actions that ran to completion.
    pub actions_fired: u64,
    /// Predicate or action panics caught by the dispatch thread.
    pub handler_faults: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    received: AtomicU64,
    stale_skipped: AtomicU64,
    actions_fired: AtomicU64,
    handler_faults: AtomicU64,
}

impl DispatchCounters {
    fn snapshot(&self) -> WatcherStats {
        WatcherStats {
            received: self.received.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            actions_fired: self.actions_fired.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

struct RunningWorker {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Lets every `stop()` caller wait for the dispatch thread, not just the
/// one that joins it. The worker holds the only sender and drops it on exit.
#[derive(Clone)]
struct DispatchExit {
    thread: ThreadId,
    exited: Receiver<()>,
}

enum Lifecycle {
    Created,
    Running(RunningWorker),
    Stopped,
}

/// Watches an event source and fans events out to registered handlers.
pub struct EventWatcher {
    cfg: WatcherConfig,
    source_name: String,
    source: Mutex<Box<dyn EventSource>>,
    registry: Arc<HandlerRegistry>,
    counters: Arc<DispatchCounters>,
    dispatching: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    lifecycle: Mutex<Lifecycle>,
    exit: Mutex<Option<DispatchExit>>,
}

impl EventWatcher {
    /// Creates a watcher with the default configuration.
    #[must_use]
    pub fn new(source: impl EventSource + 'static) -> Self {
        Self::with_config(source, WatcherConfig::default())
    }

    /// Creates a watcher with an explicit configuration.
    #[must_use]
    pub fn with_config(source: impl EventSource + 'static, cfg: WatcherConfig) -> Self {
        let source_name = source.name().to_string();
        Self {
            cfg,
            source_name,
            source: Mutex::new(Box::new(source)),
            registry: Arc::new(HandlerRegistry::default()),
            counters: Arc::new(DispatchCounters::default()),
            dispatching: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(Lifecycle::Created),
            exit: Mutex::new(None),
        }
    }

    /// Subscribes to the source and starts the dispatch thread.
    ///
    /// If the subscription cannot be opened the error is returned immediately
    /// and no thread is started; the watcher stays in its initial state.
    pub fn run(&self) -> WatchResult<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match *lifecycle {
            Lifecycle::Running(_) => return Err(WatchError::AlreadyRunning),
            Lifecycle::Stopped => return Err(WatchError::Stopped),
            Lifecycle::Created => {}
        }

        // creationTimestamp has whole-second precision.
        let started_at = Utc::now().trunc_subsecs(0);
        let subscription = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            source.subscribe().map_err(|e| {
                warn!(source = %self.source_name, error = %e, "event subscription failed");
                e
            })?
        };

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (exited_tx, exited_rx) = bounded::<()>(0);
        let worker = DispatchWorker {
            cfg: self.cfg.clone(),
            source_name: self.source_name.clone(),
            started_at,
            registry: Arc::clone(&self.registry),
            counters: Arc::clone(&self.counters),
            dispatching: Arc::clone(&self.dispatching),
            stopping: Arc::clone(&self.stopping),
            generation: 0,
            handlers: Vec::new(),
            _exited: exited_tx,
        };

        self.dispatching.store(true, Ordering::Release);
        let join = thread::Builder::new()
            .name(self.cfg.thread_name.clone())
            .spawn(move || worker.run(subscription, stop_rx))
            .map_err(|e| {
                self.dispatching.store(false, Ordering::Release);
                WatchError::Io(e)
            })?;

        *self.exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(DispatchExit {
            thread: join.thread().id(),
            exited: exited_rx,
        });
        debug!(source = %self.source_name, thread = %self.cfg.thread_name, "event watcher started");
        *lifecycle = Lifecycle::Running(RunningWorker { stop_tx, join });
        Ok(())
    }

    /// Stops the dispatch thread and waits for it to exit.
    ///
    /// Once this returns no handler action of this watcher runs again and the
    /// subscription has been released. Idempotent, and every concurrent caller
    /// waits for the thread. Calling it from inside a handler action signals
    /// the thread but cannot wait for it.
    pub fn stop(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        let join = match previous {
            Lifecycle::Running(worker) => {
                self.stopping.store(true, Ordering::Release);
                // The worker may already have exited on a closed source.
                let _ = worker.stop_tx.send(());
                Some(worker.join)
            }
            Lifecycle::Created | Lifecycle::Stopped => None,
        };

        let exit = self.exit.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(exit) = exit else {
            return;
        };

        if exit.thread == thread::current().id() {
            if join.is_some() {
                warn!(source = %self.source_name, "stop() called from the dispatch thread; not joining");
            }
            return;
        }

        // Disconnects once the worker has dropped its sender, panic included.
        let _ = exit.exited.recv();

        if let Some(join) = join {
            if join.join().is_err() {
                error!(source = %self.source_name, "dispatch thread panicked");
            }
            debug!(source = %self.source_name, "event watcher stopped");
        }
    }

    /// Registers a handler. The handler starts disabled.
    ///
    /// Safe to call while the dispatch thread is running; the handler is seen
    /// from the next event on.
    pub fn on_event(
        &self,
        predicate: Predicate,
        action: impl Fn(&Event) + Send + Sync + 'static,
    ) -> EventHandler {
        let name = format!("handler-{}", self.registry.len());
        self.on_named_event(name, predicate, action)
    }

    /// Registers a handler with a name used in logs.
    pub fn on_named_event(
        &self,
        name: impl Into<String>,
        predicate: Predicate,
        action: impl Fn(&Event) + Send + Sync + 'static,
    ) -> EventHandler {
        let entry = HandlerEntry::new(name.into(), predicate, Box::new(action));
        let entry = self.registry.register(entry);
        debug!(source = %self.source_name, handler = %entry.name(), id = %entry.id(), "handler registered");
        EventHandler::new(entry)
    }

    /// Whether the dispatch thread is still consuming events.
    ///
    /// Turns false after `stop()` or when the source ends the stream.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> WatcherStats {
        self.counters.snapshot()
    }

    /// Number of handlers registered, counters included.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Name of the watched source.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Configuration the watcher was built with.
    #[must_use]
    pub const fn config(&self) -> &WatcherConfig {
        &self.cfg
    }
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher")
            .field("source", &self.source_name)
            .field("handlers", &self.registry.len())
            .field("dispatching", &self.is_dispatching())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DispatchWorker {
    cfg: WatcherConfig,
    source_name: String,
    started_at: DateTime<Utc>,
    registry: Arc<HandlerRegistry>,
    counters: Arc<DispatchCounters>,
    dispatching: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    generation: u64,
    handlers: Vec<Arc<HandlerEntry>>,
    _exited: Sender<()>,
}

impl DispatchWorker {
    fn run(mut self, subscription: EventSubscription, stop_rx: Receiver<()>) {
        let events = subscription.receiver().clone();
        debug!(source = %self.source_name, "dispatch loop started");

        loop {
            select! {
                recv(stop_rx) -> _ => {
                    debug!(source = %self.source_name, "dispatch loop received stop");
                    break;
                }
                recv(events) -> msg => match msg {
                    Ok(event) => {
                        if self.stopping.load(Ordering::Acquire) {
                            break;
                        }
                        self.dispatch(&event);
                    }
                    Err(_) => {
                        // No reconnect: counters simply stop moving and the
                        // caller's bounded poll reports the stall.
                        warn!(source = %self.source_name, "event subscription closed; dispatch loop exiting");
                        break;
                    }
                },
            }
        }

        drop(events);
        drop(subscription);
        self.dispatching.store(false, Ordering::Release);
        debug!(source = %self.source_name, "dispatch loop exited");
    }

    fn refresh_handlers(&mut self) {
        if self.registry.generation() == self.generation {
            return;
        }
        let (generation, handlers) = self.registry.snapshot();
        self.generation = generation;
        self.handlers = handlers;
    }

    fn dispatch(&mut self, event: &Event) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if self.cfg.skip_stale_events && event.is_older_than(self.started_at) {
            self.counters.stale_skipped.fetch_add(1, Ordering::Relaxed);
            trace!(source = %self.source_name, event = %event, "skipping event created before watch start");
            return;
        }

        self.refresh_handlers();

        for handler in &self.handlers {
            if self.stopping.load(Ordering::Acquire) {
                return;
            }
            match handler.dispatch(event) {
                DispatchOutcome::Disabled | DispatchOutcome::NoMatch => {}
                DispatchOutcome::Fired => {
                    self.counters.actions_fired.fetch_add(1, Ordering::Relaxed);
                }
                DispatchOutcome::Faulted(panic) => {
                    self.counters.handler_faults.fetch_add(1, Ordering::Relaxed);
                    error!(
                        source = %self.source_name,
                        handler = %handler.name(),
                        id = %handler.id(),
                        panic = %panic,
                        "handler panicked; continuing dispatch"
                    );
                    if self.cfg.disable_faulting_handlers {
                        handler.set_enabled(false);
                        warn!(handler = %handler.name(), "faulting handler disabled");
                    }
                }
            }
        }
    }
}
