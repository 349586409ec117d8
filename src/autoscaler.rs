//! Counters and diagnostics for cluster-autoscaler events.
//!
//! The cluster autoscaler reports its decisions as events on its status
//! `ConfigMap`. Scale-up is counted per node group, so a group that is resized
//! several times still counts once; scale-down and max-size events are counted
//! one per event.

use tracing::info;

use crate::predicate::{component, match_any, message_prefix, object_kind, reason, Predicate};
use crate::watch::{DistinctKeys, EventCounter, EventHandler, EventWatcher, Increment};

/// Reporting component of autoscaler events.
pub const AUTOSCALER_COMPONENT: &str = "cluster-autoscaler";
/// Kind of the object autoscaler events are attached to.
pub const AUTOSCALER_OBJECT_KIND: &str = "ConfigMap";

/// Reason of scale-up events.
pub const REASON_SCALED_UP_GROUP: &str = "ScaledUpGroup";
/// Reason of empty-node scale-down events.
pub const REASON_SCALE_DOWN_EMPTY: &str = "ScaleDownEmpty";
/// Reason of events reporting the cluster-wide node limit.
pub const REASON_MAX_NODES_TOTAL_REACHED: &str = "MaxNodesTotalReached";

/// Message prefix of the event announcing a planned group resize.
pub const SCALE_UP_ANNOUNCE_PREFIX: &str = "Scale-up: setting group";
/// Message prefix of the event confirming a group resize.
pub const SCALE_UP_CONFIRM_PREFIX: &str = "Scale-up: group ";
/// Message prefix of empty-node scale-down events.
pub const SCALE_DOWN_EMPTY_PREFIX: &str = "Scale-down: empty node";
/// Message prefix of node-limit events.
pub const MAX_NODES_TOTAL_PREFIX: &str = "Max total nodes in cluster reached";

fn autoscaler_event(event_reason: &str) -> Predicate {
    component(AUTOSCALER_COMPONENT)
        .and(reason(event_reason))
        .and(object_kind(AUTOSCALER_OBJECT_KIND))
}

/// Autoscaler scale-up events, both announcements and confirmations.
#[must_use]
pub fn is_scale_up_event() -> Predicate {
    autoscaler_event(REASON_SCALED_UP_GROUP).and(
        message_prefix(SCALE_UP_ANNOUNCE_PREFIX).or(message_prefix(SCALE_UP_CONFIRM_PREFIX)),
    )
}

/// Autoscaler events reporting removal of an empty node.
#[must_use]
pub fn is_scale_down_event() -> Predicate {
    autoscaler_event(REASON_SCALE_DOWN_EMPTY).and(message_prefix(SCALE_DOWN_EMPTY_PREFIX))
}

/// Autoscaler events reporting that the cluster-wide node limit was hit.
#[must_use]
pub fn is_max_nodes_total_event() -> Predicate {
    autoscaler_event(REASON_MAX_NODES_TOTAL_REACHED).and(message_prefix(MAX_NODES_TOTAL_PREFIX))
}

/// Key identifying a node group in autoscaler messages.
#[must_use]
pub fn group_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Message prefix confirming that `group` was resized.
///
/// The trailing " size set to" keeps `ns/ms-a` from matching a message
/// about `ns/ms-a2`.
#[must_use]
pub fn scale_up_group_prefix(group: &str) -> String {
    format!("Scale-up: group {group} size set to")
}

/// Counts distinct node groups that were scaled up.
///
/// `groups` are `namespace/name` keys. The counter starts at `initial` and
/// grows by one the first time each group's resize is confirmed. Returned
/// disabled.
pub fn scale_up_counter<I, S>(watcher: &EventWatcher, initial: u64, groups: I) -> EventCounter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keys = DistinctKeys::with_message_prefix(groups, scale_up_group_prefix);
    EventCounter::named("scale-up", watcher, is_scale_up_event(), initial, keys)
}

/// Counts empty-node scale-down events. Returned disabled.
pub fn scale_down_counter(watcher: &EventWatcher, initial: u64) -> EventCounter {
    EventCounter::named("scale-down", watcher, is_scale_down_event(), initial, Increment)
}

/// Counts max-nodes-total-reached events. Returned disabled.
pub fn max_nodes_total_reached_counter(watcher: &EventWatcher, initial: u64) -> EventCounter {
    EventCounter::named(
        "max-nodes-total-reached",
        watcher,
        is_max_nodes_total_event(),
        initial,
        Increment,
    )
}

/// Registers and enables a handler logging every autoscaler event as
/// `<object name>: <message>`.
pub fn log_autoscaler_events(watcher: &EventWatcher) -> EventHandler {
    let handler = watcher.on_named_event("autoscaler-log", match_any(), |event| {
        if event.component == AUTOSCALER_COMPONENT {
            info!("{}: {}", event.involved_object_name, event.message);
        }
    });
    handler.enable();
    handler
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn ca_event(event_reason: &str, message: &str) -> Event {
        Event::new(event_reason, message)
            .with_component(AUTOSCALER_COMPONENT)
            .with_object(AUTOSCALER_OBJECT_KIND, "cluster-autoscaler-status")
    }

    #[test]
    fn scale_up_accepts_both_message_forms() {
        let p = is_scale_up_event();
        assert!(p.matches(&ca_event(REASON_SCALED_UP_GROUP, "Scale-up: setting group ns/ms-a size to 2")));
        assert!(p.matches(&ca_event(REASON_SCALED_UP_GROUP, "Scale-up: group ns/ms-a size set to 2")));
        assert!(!p.matches(&ca_event(REASON_SCALED_UP_GROUP, "Scale-up: pods triggered")));
    }

    #[test]
    fn predicates_require_component_and_kind() {
        let wrong_component = Event::new(REASON_SCALE_DOWN_EMPTY, "Scale-down: empty node worker-a removed")
            .with_component("kubelet")
            .with_object(AUTOSCALER_OBJECT_KIND, "cluster-autoscaler-status");
        assert!(!is_scale_down_event().matches(&wrong_component));

        let wrong_kind = Event::new(REASON_MAX_NODES_TOTAL_REACHED, "Max total nodes in cluster reached: 5")
            .with_component(AUTOSCALER_COMPONENT)
            .with_object("Pod", "workload-1");
        assert!(!is_max_nodes_total_event().matches(&wrong_kind));
        assert!(is_max_nodes_total_event().matches(&ca_event(
            REASON_MAX_NODES_TOTAL_REACHED,
            "Max total nodes in cluster reached: 5"
        )));
    }

    #[test]
    fn group_prefix_is_specific() {
        let prefix = scale_up_group_prefix(&group_key("ns", "ms-a"));
        assert_eq!(prefix, "Scale-up: group ns/ms-a size set to");
        assert!(!"Scale-up: group ns/ms-a2 size set to 2".starts_with(&prefix));
    }
}
