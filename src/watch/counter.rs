//! Event counters.
//!
//! A counter is an ordinary handler whose action folds each matching event
//! into a number through a [`Combine`] policy. The policy and the value are
//! updated together under one per-counter mutex; the result is then published
//! to an atomic so readers never wait on the dispatch thread.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PollError;
use crate::event::Event;
use crate::poll::{self, PollConfig};
use crate::predicate::Predicate;

use super::handler::EventHandler;
use super::watcher::EventWatcher;

/// Folds a matching event into the counter's current value.
///
/// Implemented by [`Increment`], [`DistinctKeys`] and any
/// `FnMut(u64, &Event) -> u64 + Send` closure.
pub trait Combine: Send + 'static {
    /// Returns the new counter value.
    fn combine(&mut self, current: u64, event: &Event) -> u64;

    /// Keys already observed, for policies that track keys.
    fn seen_keys(&self) -> Option<Vec<String>> {
        None
    }

    /// Keys not yet observed, for policies that track keys.
    fn pending_keys(&self) -> Option<Vec<String>> {
        None
    }
}

impl<F> Combine for F
where
    F: FnMut(u64, &Event) -> u64 + Send + 'static,
{
    fn combine(&mut self, current: u64, event: &Event) -> u64 {
        self(current, event)
    }
}

/// Adds one per matching event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Increment;

impl Combine for Increment {
    fn combine(&mut self, current: u64, _event: &Event) -> u64 {
        current.saturating_add(1)
    }
}

type KeyMatchFn = dyn Fn(&str, &Event) -> bool + Send;

/// Counts distinct target keys.
///
/// On every event the counter's predicate admits, each target key that has
/// not been seen yet and whose key test holds is marked seen. The value grows
/// by the number of keys marked by that event, so it never moves for repeats
/// and never grows by more than the number of targets.
pub struct DistinctKeys {
    keys: BTreeMap<String, bool>,
    matcher: Box<KeyMatchFn>,
}

impl DistinctKeys {
    /// Tracks `keys`, marking a key when `matcher(key, event)` holds.
    pub fn new<I, S>(keys: I, matcher: impl Fn(&str, &Event) -> bool + Send + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|k| (k.into(), false)).collect(),
            matcher: Box::new(matcher),
        }
    }

    /// Tracks `keys`, marking a key when the message starts with `prefix_for(key)`.
    pub fn with_message_prefix<I, S>(keys: I, prefix_for: impl Fn(&str) -> String) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: BTreeMap<String, String> = keys
            .into_iter()
            .map(|k| {
                let k = k.into();
                let prefix = prefix_for(&k);
                (k, prefix)
            })
            .collect();
        let targets: Vec<String> = prefixes.keys().cloned().collect();
        Self::new(targets, move |key, event| {
            prefixes
                .get(key)
                .is_some_and(|p| event.message.starts_with(p.as_str()))
        })
    }

    /// Marks `key` as already seen without touching the counter value.
    #[must_use]
    pub fn pre_seen(mut self, key: &str) -> Self {
        if let Some(seen) = self.keys.get_mut(key) {
            *seen = true;
        }
        self
    }

    /// Number of target keys.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.keys.len()
    }

    fn keys_where(&self, seen: bool) -> Vec<String> {
        self.keys
            .iter()
            .filter(|(_, s)| **s == seen)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl Combine for DistinctKeys {
    fn combine(&mut self, current: u64, event: &Event) -> u64 {
        let mut newly_seen = 0u64;
        for (key, seen) in &mut self.keys {
            if !*seen && (self.matcher)(key, event) {
                *seen = true;
                newly_seen += 1;
                debug!(key = %key, "distinct key observed");
            }
        }
        current.saturating_add(newly_seen)
    }

    fn seen_keys(&self) -> Option<Vec<String>> {
        Some(self.keys_where(true))
    }

    fn pending_keys(&self) -> Option<Vec<String>> {
        Some(self.keys_where(false))
    }
}

impl fmt::Debug for DistinctKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistinctKeys")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

struct CounterCell {
    value: AtomicU64,
    combine: Mutex<Box<dyn Combine>>,
}

impl CounterCell {
    fn apply(&self, event: &Event) -> (u64, u64) {
        let mut combine = self.combine.lock().unwrap_or_else(PoisonError::into_inner);
        let before = self.value.load(Ordering::Acquire);
        let after = combine.combine(before, event);
        self.value.store(after, Ordering::Release);
        (before, after)
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn with_combine<T>(&self, f: impl FnOnce(&dyn Combine) -> T) -> T {
        let combine = self.combine.lock().unwrap_or_else(PoisonError::into_inner);
        f(combine.as_ref())
    }
}

/// Arming state of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterPhase {
    /// Registered but never armed.
    Created,
    /// Counting matching events.
    Enabled,
    /// Armed before, currently not counting.
    Paused,
}

/// A queryable counter over matching events.
///
/// Construction registers a disabled handler on the watcher; nothing is
/// counted until [`EventCounter::enable`] is called.
pub struct EventCounter {
    name: String,
    handler: EventHandler,
    cell: Arc<CounterCell>,
    armed: AtomicBool,
}

impl EventCounter {
    /// Registers a counter starting at `initial`.
    pub fn new(
        watcher: &EventWatcher,
        predicate: Predicate,
        initial: u64,
        combine: impl Combine,
    ) -> Self {
        let name = format!("counter-{}", watcher.handler_count());
        Self::named(name, watcher, predicate, initial, combine)
    }

    /// Registers a counter with a name used in logs and poll descriptions.
    pub fn named(
        name: impl Into<String>,
        watcher: &EventWatcher,
        predicate: Predicate,
        initial: u64,
        combine: impl Combine,
    ) -> Self {
        let name = name.into();
        let cell = Arc::new(CounterCell {
            value: AtomicU64::new(initial),
            combine: Mutex::new(Box::new(combine)),
        });

        let action_cell = Arc::clone(&cell);
        let action_name = name.clone();
        let handler = watcher.on_named_event(name.clone(), predicate, move |event| {
            let (before, after) = action_cell.apply(event);
            if before != after {
                debug!(counter = %action_name, before, after, "counter updated");
            }
        });

        Self {
            name,
            handler,
            cell,
            armed: AtomicBool::new(false),
        }
    }

    /// Starts counting.
    pub fn enable(&self) -> &Self {
        self.armed.store(true, Ordering::Release);
        self.handler.enable();
        self
    }

    /// Stops counting; the value is kept.
    pub fn disable(&self) -> &Self {
        self.handler.disable();
        self
    }

    /// Current value. Never blocks on the dispatch thread.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.cell.get()
    }

    /// Current arming state.
    #[must_use]
    pub fn phase(&self) -> CounterPhase {
        if self.handler.is_enabled() {
            CounterPhase::Enabled
        } else if self.armed.load(Ordering::Acquire) {
            CounterPhase::Paused
        } else {
            CounterPhase::Created
        }
    }

    /// Whether matching events are being counted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.handler.is_enabled()
    }

    /// Name used in logs and poll descriptions.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying handler registration.
    #[must_use]
    pub const fn handler(&self) -> &EventHandler {
        &self.handler
    }

    /// Keys observed so far, for key-tracking counters.
    #[must_use]
    pub fn seen_keys(&self) -> Option<Vec<String>> {
        self.cell.with_combine(|c| c.seen_keys())
    }

    /// Keys not yet observed, for key-tracking counters.
    #[must_use]
    pub fn pending_keys(&self) -> Option<Vec<String>> {
        self.cell.with_combine(|c| c.pending_keys())
    }

    /// Waits until the value equals `expected`.
    pub fn wait_for(&self, expected: u64, cfg: &PollConfig) -> Result<u64, PollError> {
        let description = format!("expecting {expected} from {}", self.name);
        poll::eventually(cfg, &description, || self.get(), |v| *v == expected)
    }

    /// Waits until the value is at least `minimum`.
    pub fn wait_at_least(&self, minimum: u64, cfg: &PollConfig) -> Result<u64, PollError> {
        let description = format!("expecting at least {minimum} from {}", self.name);
        poll::eventually(cfg, &description, || self.get(), |v| *v >= minimum)
    }

    /// Checks that the value stays at `expected` for the whole timeout.
    pub fn hold_at(&self, expected: u64, cfg: &PollConfig) -> Result<u64, PollError> {
        let description = format!("expecting {} to stay at {expected}", self.name);
        poll::consistently(cfg, &description, || self.get(), |v| *v == expected)
    }
}

impl fmt::Debug for EventCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCounter")
            .field("name", &self.name)
            .field("value", &self.get())
            .field("phase", &self.phase())
            .finish()
    }
}

impl fmt::Display for EventCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{match_any, message_prefix, reason};
    use crate::source::ChannelSource;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn increment_saturates() {
        let mut inc = Increment;
        assert_eq!(inc.combine(4, &Event::new("r", "m")), 5);
        assert_eq!(inc.combine(u64::MAX, &Event::new("r", "m")), u64::MAX);
    }

    #[test]
    fn distinct_keys_count_once() {
        let mut keys = DistinctKeys::with_message_prefix(["a", "b", "c"], |k| format!("key {k} "));
        let mut v = 0;
        for msg in ["key b hit", "key b hit", "key a hit", "other", "key c hit", "key a hit"] {
            v = keys.combine(v, &Event::new("r", msg));
        }
        assert_eq!(v, 3);
        assert_eq!(keys.pending_keys(), Some(Vec::new()));
        v = keys.combine(v, &Event::new("r", "key c hit"));
        assert_eq!(v, 3);
    }

    #[test]
    fn distinct_keys_prefix_does_not_bleed_between_keys() {
        let mut keys =
            DistinctKeys::with_message_prefix(["ns/ms-a", "ns/ms-a2"], |k| format!("group {k} size set to"));
        let v = keys.combine(0, &Event::new("r", "group ns/ms-a2 size set to 3"));
        assert_eq!(v, 1);
        assert_eq!(keys.seen_keys(), Some(vec!["ns/ms-a2".to_string()]));
    }

    #[test]
    fn pre_seen_keys_do_not_count() {
        let mut keys = DistinctKeys::with_message_prefix(["a", "b"], |k| k.to_string()).pre_seen("a");
        assert_eq!(keys.target_count(), 2);
        assert_eq!(keys.combine(0, &Event::new("r", "a")), 0);
        assert_eq!(keys.combine(0, &Event::new("r", "b")), 1);
    }

    #[test]
    fn closure_policy() {
        let (source, publisher) = ChannelSource::new("events");
        let watcher = EventWatcher::new(source);
        let doubled = EventCounter::new(&watcher, match_any(), 1, |current: u64, _: &Event| current * 2);
        doubled.enable();
        watcher.run().unwrap();
        publisher.publish_all([Event::new("a", "1"), Event::new("b", "2"), Event::new("c", "3")]);
        assert!(wait_until(|| doubled.get() == 8));
        watcher.stop();
    }

    #[test]
    fn phases() {
        let (source, _publisher) = ChannelSource::new("events");
        let watcher = EventWatcher::new(source);
        let counter = EventCounter::named("scale-down", &watcher, reason("ScaleDownEmpty"), 0, Increment);
        assert_eq!(counter.phase(), CounterPhase::Created);
        counter.enable();
        assert_eq!(counter.phase(), CounterPhase::Enabled);
        counter.disable();
        assert_eq!(counter.phase(), CounterPhase::Paused);
        assert_eq!(counter.to_string(), "scale-down=0");
        assert_eq!(counter.seen_keys(), None);
    }

    #[test]
    fn created_counter_ignores_events() {
        let (source, publisher) = ChannelSource::new("events");
        let watcher = EventWatcher::new(source);
        let counter = EventCounter::new(&watcher, message_prefix("hit"), 0, Increment);
        watcher.run().unwrap();
        publisher.publish(Event::new("r", "hit 1"));
        assert!(wait_until(|| watcher.stats().received == 1));
        assert_eq!(counter.get(), 0);

        counter.enable();
        publisher.publish(Event::new("r", "hit 2"));
        assert!(wait_until(|| counter.get() == 1));
        watcher.stop();
    }

    #[test]
    fn waits_use_bounded_polling() {
        let (source, publisher) = ChannelSource::new("events");
        let watcher = EventWatcher::new(source);
        let counter = EventCounter::named("hits", &watcher, match_any(), 0, Increment);
        counter.enable();
        watcher.run().unwrap();
        publisher.publish_all([Event::new("a", "1"), Event::new("a", "2")]);

        let cfg = PollConfig::new(Duration::from_secs(5), Duration::from_millis(5));
        assert_eq!(counter.wait_for(2, &cfg).unwrap(), 2);
        assert_eq!(counter.wait_at_least(1, &cfg).unwrap(), 2);

        let brief = PollConfig::new(Duration::from_millis(30), Duration::from_millis(5));
        assert_eq!(counter.hold_at(2, &brief).unwrap(), 2);
        assert!(matches!(counter.wait_for(3, &brief), Err(PollError::Timeout { .. })));
        watcher.stop();
    }
}
