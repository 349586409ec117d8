//! Cluster status events as consumed by the watcher.
//!
//! Only the fields the dispatch loop and predicates look at are kept. Events
//! can be deserialized either from the flat shape produced by [`Event`]'s own
//! `Serialize` impl or from a Kubernetes `core/v1` Event object, so recorded
//! `kubectl get events -o json` output can be replayed as-is.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cluster-emitted status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EventRepr")]
pub struct Event {
    /// Component that reported the event (e.g. `cluster-autoscaler`).
    pub component: String,
    /// Machine-readable reason code (e.g. `ScaledUpGroup`).
    pub reason: String,
    /// Kind of the object the event is about.
    pub involved_object_kind: String,
    /// Name of the object the event is about.
    pub involved_object_name: String,
    /// Free-form human-readable message.
    pub message: String,
    /// When the cluster created the event, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Creates an event with the given reason and message and no source or object.
    #[must_use]
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: String::new(),
            reason: reason.into(),
            involved_object_kind: String::new(),
            involved_object_name: String::new(),
            message: message.into(),
            creation_timestamp: None,
        }
    }

    /// Sets the reporting component.
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    /// Sets the involved object kind and name.
    #[must_use]
    pub fn with_object(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.involved_object_kind = kind.into();
        self.involved_object_name = name.into();
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(ts);
        self
    }

    /// Returns true if the event was created strictly before `instant`.
    ///
    /// Events without a timestamp are never considered older.
    #[must_use]
    pub fn is_older_than(&self, instant: DateTime<Utc>) -> bool {
        self.creation_timestamp.is_some_and(|ts| ts < instant)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}/{}: {}",
            self.component, self.reason, self.involved_object_kind, self.involved_object_name, self.message
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventRepr {
    Kube(KubeEvent),
    Flat(FlatEvent),
}

#[derive(Deserialize)]
struct FlatEvent {
    #[serde(default)]
    component: String,
    reason: String,
    #[serde(default)]
    involved_object_kind: String,
    #[serde(default)]
    involved_object_name: String,
    message: String,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeEvent {
    #[serde(default)]
    metadata: KubeMeta,
    involved_object: KubeObjectRef,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    source: KubeEventSource,
    #[serde(default)]
    reporting_component: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct KubeMeta {
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct KubeObjectRef {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Default)]
struct KubeEventSource {
    #[serde(default)]
    component: String,
}

impl From<EventRepr> for Event {
    fn from(repr: EventRepr) -> Self {
        match repr {
            EventRepr::Flat(f) => Self {
                component: f.component,
                reason: f.reason,
                involved_object_kind: f.involved_object_kind,
                involved_object_name: f.involved_object_name,
                message: f.message,
                creation_timestamp: f.creation_timestamp,
            },
            EventRepr::Kube(k) => {
                // events.k8s.io-style writers leave source.component empty.
                let component = if k.source.component.is_empty() {
                    k.reporting_component
                } else {
                    k.source.component
                };
                Self {
                    component,
                    reason: k.reason,
                    involved_object_kind: k.involved_object.kind,
                    involved_object_name: k.involved_object.name,
                    message: k.message,
                    creation_timestamp: k.metadata.creation_timestamp,
                }
            }
        }
    }
}
