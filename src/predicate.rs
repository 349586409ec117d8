//! Predicates over single events.
//!
//! A [`Predicate`] is a cheap-to-clone, thread-safe boolean test. Field
//! predicates compare exactly; message predicates test a prefix, a substring
//! or a regex. [`EventSelector`] is the declarative, serde-loadable form of a
//! conjunction of field tests.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{WatchError, WatchResult};
use crate::event::Event;

type MatchFn = dyn Fn(&Event) -> bool + Send + Sync;

/// A pure boolean test over an event.
#[derive(Clone)]
pub struct Predicate {
    f: Arc<MatchFn>,
}

impl Predicate {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    /// Evaluates the predicate.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        (self.f)(event)
    }

    /// Both `self` and `other` must hold.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::new(move |e| self.matches(e) && other.matches(e))
    }

    /// Either `self` or `other` must hold.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::new(move |e| self.matches(e) || other.matches(e))
    }

    /// Inverts the predicate.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::new(move |e| !self.matches(e))
    }

    /// Holds when every predicate holds; an empty set always holds.
    #[must_use]
    pub fn all(preds: impl IntoIterator<Item = Self>) -> Self {
        let preds: Vec<Self> = preds.into_iter().collect();
        Self::new(move |e| preds.iter().all(|p| p.matches(e)))
    }

    /// Holds when any predicate holds; an empty set never holds.
    #[must_use]
    pub fn any(preds: impl IntoIterator<Item = Self>) -> Self {
        let preds: Vec<Self> = preds.into_iter().collect();
        Self::new(move |e| preds.iter().any(|p| p.matches(e)))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Matches every event.
#[must_use]
pub fn match_any() -> Predicate {
    Predicate::new(|_| true)
}

/// Reporting component equals `component`.
#[must_use]
pub fn component(component: impl Into<String>) -> Predicate {
    let want = component.into();
    Predicate::new(move |e| e.component == want)
}

/// Reason code equals `reason`.
#[must_use]
pub fn reason(reason: impl Into<String>) -> Predicate {
    let want = reason.into();
    Predicate::new(move |e| e.reason == want)
}

/// Involved object kind equals `kind`.
#[must_use]
pub fn object_kind(kind: impl Into<String>) -> Predicate {
    let want = kind.into();
    Predicate::new(move |e| e.involved_object_kind == want)
}

/// Involved object name equals `name`.
#[must_use]
pub fn object_name(name: impl Into<String>) -> Predicate {
    let want = name.into();
    Predicate::new(move |e| e.involved_object_name == want)
}

/// Message starts with `prefix`.
#[must_use]
pub fn message_prefix(prefix: impl Into<String>) -> Predicate {
    let prefix = prefix.into();
    Predicate::new(move |e| e.message.starts_with(prefix.as_str()))
}

/// Message contains `needle`.
#[must_use]
pub fn message_contains(needle: impl Into<String>) -> Predicate {
    let needle = needle.into();
    Predicate::new(move |e| e.message.contains(needle.as_str()))
}

/// Message matches `re` anywhere.
#[must_use]
pub fn message_regex(re: Regex) -> Predicate {
    Predicate::new(move |e| re.is_match(&e.message))
}

/// Declarative conjunction of field tests.
///
/// Unset fields are not checked, so the default selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventSelector {
    /// Exact reporting component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Exact reason code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Exact involved object kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_kind: Option<String>,
    /// Exact involved object name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    /// Required message prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_prefix: Option<String>,
    /// Regular expression tested against the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_pattern: Option<String>,
}

impl EventSelector {
    /// Compiles the selector.
    ///
    /// Fails only when `message_pattern` is not a valid regex.
    pub fn into_predicate(self) -> WatchResult<Predicate> {
        let mut parts = Vec::new();
        if let Some(c) = self.component {
            parts.push(component(c));
        }
        if let Some(r) = self.reason {
            parts.push(reason(r));
        }
        if let Some(k) = self.object_kind {
            parts.push(object_kind(k));
        }
        if let Some(n) = self.object_name {
            parts.push(object_name(n));
        }
        if let Some(p) = self.message_prefix {
            parts.push(message_prefix(p));
        }
        if let Some(pattern) = self.message_pattern {
            let re = Regex::new(&pattern).map_err(|e| WatchError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            parts.push(message_regex(re));
        }

        if parts.is_empty() {
            return Ok(match_any());
        }
        Ok(Predicate::all(parts))
    }
}
