use std::io::Write;
use std::time::Duration;

use scalewatch::autoscaler;
use scalewatch::predicate::{message_prefix, reason};
use scalewatch::{
    ChannelSource, Event, EventCounter, EventSelector, EventWatcher, Increment, PollConfig, ReplaySource,
    WatchError, WatcherConfig,
};

const RECORDED_EVENTS: &str = r#"{
  "apiVersion": "v1",
  "kind": "EventList",
  "items": [
    {
      "metadata": {"name": "cluster-autoscaler-status.1", "creationTimestamp": "2024-03-01T10:00:00Z"},
      "involvedObject": {"kind": "ConfigMap", "name": "cluster-autoscaler-status"},
      "reason": "ScaledUpGroup",
      "message": "Scale-up: setting group ns/ms-a size to 2",
      "source": {"component": "cluster-autoscaler"}
    },
    {
      "metadata": {"name": "cluster-autoscaler-status.2", "creationTimestamp": "2024-03-01T10:00:01Z"},
      "involvedObject": {"kind": "ConfigMap", "name": "cluster-autoscaler-status"},
      "reason": "ScaledUpGroup",
      "message": "Scale-up: group ns/ms-a size set to 2",
      "source": {"component": "cluster-autoscaler"}
    },
    {
      "metadata": {"name": "worker-x.1", "creationTimestamp": "2024-03-01T10:00:02Z"},
      "involvedObject": {"kind": "Node", "name": "worker-x"},
      "reason": "NodeReady",
      "message": "Node worker-x status is now: NodeReady",
      "source": {"component": "kubelet"}
    },
    {
      "metadata": {"name": "cluster-autoscaler-status.3", "creationTimestamp": "2024-03-01T10:00:03Z"},
      "involvedObject": {"kind": "ConfigMap", "name": "cluster-autoscaler-status"},
      "reason": "ScaledUpGroup",
      "message": "Scale-up: group ns/ms-b size set to 2",
      "source": {"component": "cluster-autoscaler"}
    },
    {
      "metadata": {"name": "cluster-autoscaler-status.4", "creationTimestamp": "2024-03-01T10:05:00Z"},
      "involvedObject": {"kind": "ConfigMap", "name": "cluster-autoscaler-status"},
      "reason": "ScaleDownEmpty",
      "message": "Scale-down: empty node worker-x removed",
      "reportingComponent": "cluster-autoscaler"
    }
  ]
}"#;

fn replay_config() -> WatcherConfig {
    WatcherConfig {
        skip_stale_events: false,
        ..WatcherConfig::default()
    }
}

fn fast_poll() -> PollConfig {
    PollConfig::new(Duration::from_secs(5), Duration::from_millis(5))
}

/// Runs the autoscaler counters over `watcher` and returns (scale-up, scale-down)
/// once the watcher has drained `total` events.
fn count(watcher: &EventWatcher, publish: impl FnOnce(), total: u64) -> (u64, u64) {
    let scale_up = autoscaler::scale_up_counter(watcher, 0, ["ns/ms-a", "ns/ms-b", "ns/ms-c"]);
    let scale_down = autoscaler::scale_down_counter(watcher, 0);
    scale_up.enable();
    scale_down.enable();
    watcher.run().unwrap();
    publish();

    scalewatch::eventually(&fast_poll(), "replay drained", || watcher.stats().received, |n| *n == total).unwrap();
    // Scale-down is the last handler and the last event matches it.
    scale_down.wait_for(1, &fast_poll()).unwrap();
    watcher.stop();
    (scale_up.get(), scale_down.get())
}

#[test]
fn replayed_log_matches_live_delivery() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(RECORDED_EVENTS.as_bytes()).unwrap();
    file.flush().unwrap();

    let replay = ReplaySource::from_path(file.path()).unwrap();
    assert_eq!(replay.len(), 5);
    let recorded = replay.events().to_vec();

    let replay_watcher = EventWatcher::with_config(replay, replay_config());
    let replayed = count(&replay_watcher, || {}, 5);

    let (live, publisher) = ChannelSource::new("live");
    let live_watcher = EventWatcher::with_config(live, replay_config());
    let delivered = count(
        &live_watcher,
        || {
            publisher.publish_all(recorded);
        },
        5,
    );

    assert_eq!(replayed, (2, 1));
    assert_eq!(replayed, delivered);
}

#[test]
fn replay_with_stale_filter_drops_everything_recorded() {
    let replay = ReplaySource::from_reader("recorded", RECORDED_EVENTS.as_bytes()).unwrap();
    let watcher = EventWatcher::new(replay);
    let all = EventCounter::new(&watcher, scalewatch::match_any(), 0, Increment);
    all.enable();
    watcher.run().unwrap();

    scalewatch::eventually(&fast_poll(), "stale events skipped", || watcher.stats().stale_skipped, |n| *n == 5)
        .unwrap();
    watcher.stop();
    assert_eq!(all.get(), 0);
}

#[test]
fn json_lines_log_with_selector() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for (i, node) in ["worker-a", "worker-b"].iter().enumerate() {
        let ev = Event::new("ScaleDownEmpty", format!("Scale-down: empty node {node} removed"))
            .with_component("cluster-autoscaler")
            .with_object("ConfigMap", "cluster-autoscaler-status");
        writeln!(file, "{}", serde_json::to_string(&ev).unwrap()).unwrap();
        if i == 0 {
            writeln!(file).unwrap();
        }
    }
    file.flush().unwrap();

    let selector: EventSelector = serde_json::from_str(
        r#"{"component": "cluster-autoscaler", "reason": "ScaleDownEmpty", "message_pattern": "^Scale-down: empty node worker-[a-z]+ removed$"}"#,
    )
    .unwrap();

    let watcher = EventWatcher::with_config(ReplaySource::from_path(file.path()).unwrap(), replay_config());
    let selected = EventCounter::named("selected", &watcher, selector.into_predicate().unwrap(), 0, Increment);
    let prefixed = EventCounter::new(
        &watcher,
        reason("ScaleDownEmpty").and(message_prefix("Scale-down: empty node worker-b")),
        0,
        Increment,
    );
    selected.enable();
    prefixed.enable();
    watcher.run().unwrap();

    prefixed.wait_for(1, &fast_poll()).unwrap();
    watcher.stop();
    assert_eq!(selected.get(), 2);
}

#[test]
fn missing_log_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ReplaySource::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, WatchError::Io(_)));
}
