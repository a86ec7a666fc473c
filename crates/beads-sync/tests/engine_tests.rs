//! SyncEngine Tests
//!
//! End-to-end behaviour of the engine loop against a scripted push channel
//! and in-memory backends, on a paused tokio clock.

use beads_graph::{NodeId, NodePatch, Status, Vec3};
use beads_stream::{BackoffPolicy, ConnectionState};
use beads_sync::*;
use beads_test_utils::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

struct Harness {
    engine: SyncEngine,
    config: SyncConfig,
    transport: Arc<ScriptedTransport>,
    source: Arc<StaticSnapshotSource>,
    backend: Arc<RecordingBackend>,
    feed: Feed,
    signals: broadcast::Receiver<SyncSignal>,
}

fn config() -> SyncConfig {
    SyncConfig::default()
        .with_base_url("http://beads.test")
        .without_bus()
}

/// Engine with one open mutation channel and the sample graph loaded
async fn harness(config: SyncConfig) -> Harness {
    let transport = Arc::new(ScriptedTransport::default());
    let feed = transport.push_open(&config.mutation_stream_url());
    let source = Arc::new(StaticSnapshotSource::new(sample_snapshot()));
    let backend = Arc::new(RecordingBackend::new());
    let engine = SyncEngine::init(
        config.clone(),
        transport.clone(),
        source.clone(),
        backend.clone(),
    )
    .unwrap();
    let mut signals = engine.subscribe();

    next_signal(&mut signals, |s| matches!(s, SyncSignal::StructuralChange { .. })).await;
    let mut connectivity = engine.watch_connectivity();
    connectivity
        .wait_for(|c| c.state == ConnectionState::Connected)
        .await
        .unwrap();

    Harness {
        engine,
        config,
        transport,
        source,
        backend,
        feed,
        signals,
    }
}

async fn next_signal(
    signals: &mut broadcast::Receiver<SyncSignal>,
    matches: impl Fn(&SyncSignal) -> bool,
) -> SyncSignal {
    loop {
        let signal = tokio::time::timeout(Duration::from_secs(300), signals.recv())
            .await
            .expect("signal within timeout")
            .expect("signal channel open");
        if matches(&signal) {
            return signal;
        }
    }
}

fn status_of(engine: &SyncEngine, id: &str) -> Status {
    engine.mirror().read().node(id).unwrap().attrs.status.clone()
}

#[tokio::test(start_paused = true)]
async fn test_initial_load_populates_mirror() {
    let h = harness(config()).await;
    let mirror = h.engine.mirror();
    let mirror = mirror.read();

    assert_eq!(mirror.node_count(), 5);
    assert_eq!(mirror.link_count(), 3);
    assert!(mirror.node("bd-2").unwrap().flags.blocked);
    assert_eq!(h.source.fetches(), 1);
    assert_eq!(h.engine.connectivity().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_create_event_waits_for_short_refresh() {
    let mut h = harness(config()).await;
    h.source.set(sample_snapshot_with("bd-9"));

    let started = Instant::now();
    h.feed.send_mutation("create", "bd-9", json!({ "title": "bd-9" }));

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert!(!h.engine.mirror().read().contains("bd-9"));
    assert_eq!(h.source.fetches(), 1);

    let signal = next_signal(&mut h.signals, |s| {
        matches!(s, SyncSignal::StructuralChange { .. })
    })
    .await;
    assert_eq!(
        signal,
        SyncSignal::StructuralChange {
            added: vec![NodeId::from("bd-9")],
            removed: vec![],
        }
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_100), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_status_event_applies_locally_and_defers_refresh() {
    let mut h = harness(config()).await;
    let title_before = h.engine.mirror().read().node("bd-2").unwrap().attrs.title.clone();

    h.feed.send_mutation("status", "bd-2", json!({ "new_status": "closed" }));
    let signal = next_signal(&mut h.signals, |s| {
        matches!(s, SyncSignal::StatusTransition { .. })
    })
    .await;

    assert_eq!(
        signal,
        SyncSignal::StatusTransition {
            id: NodeId::from("bd-2"),
            from: Status::Open,
            to: Status::Closed,
        }
    );
    assert_eq!(status_of(&h.engine, "bd-2"), Status::Closed);
    assert_eq!(
        h.engine.mirror().read().node("bd-2").unwrap().attrs.title,
        title_before
    );
    // bd-3 is no longer blocked by a live issue
    assert!(!h.engine.mirror().read().node("bd-3").unwrap().flags.blocked);

    tokio::time::sleep(Duration::from_millis(9_900)).await;
    assert_eq!(h.source.fetches(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_event_burst_coalesces_into_one_refresh() {
    let h = harness(config()).await;

    for status in ["in_progress", "blocked", "open", "in_progress", "closed"] {
        h.feed.send_mutation("status", "bd-3", json!({ "status": status }));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(h.source.fetches(), 1);

    tokio::time::sleep(Duration::from_millis(9_100)).await;
    assert_eq!(h.source.fetches(), 2);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_forces_quick_refresh() {
    let mut h = harness(config()).await;
    let _second = h.transport.push_open(&h.config.mutation_stream_url());

    drop(h.feed);
    next_signal(&mut h.signals, |s| {
        matches!(
            s,
            SyncSignal::Connectivity {
                state: ConnectionState::Reconnecting,
                ..
            }
        )
    })
    .await;
    next_signal(&mut h.signals, |s| {
        matches!(
            s,
            SyncSignal::Connectivity {
                state: ConnectionState::Connected,
                ..
            }
        )
    })
    .await;
    assert_eq!(h.transport.connects(&h.config.mutation_stream_url()), 2);

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(h.source.fetches(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_structural_refresh_pins_then_releases() {
    let mut h = harness(config()).await;
    {
        let mirror = h.engine.mirror();
        let mut mirror = mirror.write();
        for (i, id) in ["gt-nux", "bd-1", "bd-2", "bd-3", "bd-4"].iter().enumerate() {
            mirror.set_position(id, Vec3::new(i as f64 * 10.0, 0.0, 0.0));
        }
    }

    h.source.set(sample_snapshot_with("bd-9"));
    h.engine.refresh_now().unwrap();
    next_signal(&mut h.signals, |s| {
        matches!(s, SyncSignal::StructuralChange { .. })
    })
    .await;
    let frozen_at = Instant::now();

    {
        let mirror = h.engine.mirror();
        let mirror = mirror.read();
        for id in ["gt-nux", "bd-1", "bd-2", "bd-3", "bd-4"] {
            let spatial = mirror.spatial(id).unwrap();
            assert!(spatial.is_pinned(), "{id} should be pinned");
            assert_eq!(spatial.pin, spatial.position);
        }
        // Seeded next to bd-3 and free
        assert!(mirror.node("bd-9").unwrap().position().is_some());
        assert!(!mirror.spatial("bd-9").unwrap().is_pinned());
    }

    let signal =
        next_signal(&mut h.signals, |s| matches!(s, SyncSignal::PinsReleased { .. })).await;
    assert_eq!(signal, SyncSignal::PinsReleased { count: 5 });
    assert!(frozen_at.elapsed() >= Duration::from_millis(1_500));
    assert!(h
        .engine
        .mirror()
        .read()
        .nodes()
        .all(|node| !node.spatial.is_pinned()));
}

#[tokio::test(start_paused = true)]
async fn test_fetches_are_single_flight() {
    let h = harness(config()).await;
    h.source.set_latency(Duration::from_secs(1));

    h.engine.refresh_now().unwrap();
    h.engine.refresh_now().unwrap();
    h.engine.refresh_now().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.source.fetches(), 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.source.fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_leaves_mirror_until_next_poll() {
    let h = harness(config().with_poll_interval(Duration::from_secs(30))).await;
    h.source.set_failing(true);
    h.source.set(sample_snapshot_with("bd-9"));

    h.engine.refresh_now().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.source.fetches(), 2);
    assert!(!h.engine.mirror().read().contains("bd-9"));

    h.source.set_failing(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.source.fetches(), 3);
    assert!(h.engine.mirror().read().contains("bd-9"));
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_status_change_commits() {
    let h = harness(config()).await;
    let mutator = h.engine.mutator();

    mutator.set_status("bd-3", Status::InProgress).await.unwrap();

    assert_eq!(status_of(&h.engine, "bd-3"), Status::InProgress);
    assert_eq!(
        h.backend.calls(),
        vec![RecordedCall::Status {
            id: NodeId::from("bd-3"),
            status: Status::InProgress,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_mutation_rolls_back_with_notice() {
    let mut h = harness(config()).await;
    h.backend.set_rejecting(true);
    let mutator = h.engine.mutator();

    let err = mutator.close("bd-2", Some("done")).await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected { .. }));

    let notice = next_signal(&mut h.signals, |s| matches!(s, SyncSignal::Notice { .. })).await;
    let SyncSignal::Notice { level, message } = notice else {
        unreachable!()
    };
    assert_eq!(level, NoticeLevel::Error);
    assert!(message.contains("HTTP 409"), "{message}");
    assert_eq!(status_of(&h.engine, "bd-2"), Status::Open);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_update_rolls_back_every_node() {
    let mut h = harness(config()).await;
    h.backend.set_rejecting(true);
    let patch = NodePatch::default().with_assignee(Some("furiosa".into()));

    let result = h
        .engine
        .mutator()
        .bulk_update(&["bd-2", "bd-3"], patch)
        .await;
    assert!(result.is_err());

    next_signal(&mut h.signals, |s| matches!(s, SyncSignal::Notice { .. })).await;
    let mirror = h.engine.mirror();
    let mirror = mirror.read();
    assert_eq!(mirror.node("bd-2").unwrap().attrs.assignee, None);
    assert_eq!(mirror.node("bd-3").unwrap().attrs.assignee, None);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_node_is_rejected_before_backend() {
    let h = harness(config()).await;
    let err = h
        .engine
        .mutator()
        .set_status("bd-404", Status::Closed)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownNode(id) if id == "bd-404"));
    assert!(h.backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_surfaces_and_manual_retry_reconnects() {
    let config = config().with_backoff(BackoffPolicy::default().with_max_attempts(2));
    let transport = Arc::new(ScriptedTransport::new(WhenEmpty::Fail));
    let source = Arc::new(StaticSnapshotSource::new(sample_snapshot()));
    let engine = SyncEngine::init(
        config.clone(),
        transport.clone(),
        source,
        Arc::new(RecordingBackend::new()),
    )
    .unwrap();
    let mut signals = engine.subscribe();

    let disconnected = next_signal(&mut signals, |s| {
        matches!(
            s,
            SyncSignal::Connectivity {
                state: ConnectionState::Disconnected,
                ..
            }
        )
    })
    .await;
    assert!(matches!(disconnected, SyncSignal::Connectivity { .. }));
    let url = config.mutation_stream_url();
    assert_eq!(transport.connects(&url), 3);

    let _feed = transport.push_open(&url);
    engine.reconnect_all().unwrap();
    next_signal(&mut signals, |s| {
        matches!(
            s,
            SyncSignal::Connectivity {
                state: ConnectionState::Connected,
                ..
            }
        )
    })
    .await;
    assert_eq!(transport.connects(&url), 4);
}

#[tokio::test(start_paused = true)]
async fn test_bus_events_are_forwarded() {
    let config = SyncConfig::default().with_base_url("http://beads.test");
    let transport = Arc::new(ScriptedTransport::default());
    let _mutations = transport.push_open(&config.mutation_stream_url());
    let bus = transport.push_open(&config.bus_stream_url().unwrap());
    let engine = SyncEngine::init(
        config,
        transport,
        Arc::new(StaticSnapshotSource::new(sample_snapshot())),
        Arc::new(RecordingBackend::new()),
    )
    .unwrap();
    let mut signals = engine.subscribe();

    bus.send_frame(
        Some("agents"),
        &json!({ "type": "spawned", "payload": { "id": "gt-nux" } }).to_string(),
    );
    let signal = next_signal(&mut signals, |s| matches!(s, SyncSignal::Bus(_))).await;
    let SyncSignal::Bus(event) = signal else {
        unreachable!()
    };
    assert_eq!(event.kind, "spawned");
    assert_eq!(event.issue_id.as_deref(), Some("gt-nux"));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_stops_channels_and_timers() {
    let h = harness(config()).await;
    h.feed.send_mutation("create", "bd-9", json!({}));
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.engine.teardown().await;
    h.engine.destroy().await;
    assert!(h.engine.is_closed());
    assert!(matches!(h.engine.refresh_now(), Err(SyncError::Closed)));
    assert!(matches!(
        h.engine.mutator().set_status("bd-1", Status::Closed).await,
        Err(SyncError::Closed)
    ));

    let connects = h.transport.connects(&h.config.mutation_stream_url());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.source.fetches(), 1);
    assert_eq!(
        h.transport.connects(&h.config.mutation_stream_url()),
        connects
    );
}
