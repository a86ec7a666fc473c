//! Push event reconciliation
//!
//! [`MutationReconciler`] applies what it safely can from a push event
//! directly to the mirror and schedules an authoritative snapshot refresh
//! for the rest:
//! - `status` on a known node: status only, then a long refresh window
//! - `update` on a known node: present fields only, long window
//! - `create`, `delete`, unknown ids: mirror untouched, short window
//!
//! Every event re-arms the debounce, so a burst of events produces a single
//! refresh. A channel coming back after a drop forces one quick refresh that
//! later events do not postpone.

use crate::signal::SyncSignal;
use crate::task::CancellableTask;
use beads_graph::{GraphMirror, IssueType, NodeId, NodePatch, Status};
use beads_stream::{
    BusEvent, ConnectionState, ConnectionStatus, MutationEvent, MutationFields, MutationKind,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Mirror shared between the engine loop and readers
pub type SharedMirror = Arc<RwLock<GraphMirror>>;

/// Refresh debounce windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// After an event was applied locally (milliseconds)
    pub applied_delay_ms: u64,
    /// After an event the mirror could not absorb (milliseconds)
    pub stale_delay_ms: u64,
    /// After a channel recovers from a drop (milliseconds)
    pub reconnect_delay_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            applied_delay_ms: 10_000,
            stale_delay_ms: 3_000,
            reconnect_delay_ms: 500,
        }
    }
}

impl RefreshPolicy {
    /// Set applied window
    #[inline]
    #[must_use]
    pub fn with_applied_delay(mut self, delay: Duration) -> Self {
        self.applied_delay_ms = millis(delay);
        self
    }

    /// Set stale window
    #[inline]
    #[must_use]
    pub fn with_stale_delay(mut self, delay: Duration) -> Self {
        self.stale_delay_ms = millis(delay);
        self
    }

    /// Set reconnect window
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = millis(delay);
        self
    }

    #[inline]
    #[must_use]
    pub fn applied_delay(&self) -> Duration {
        Duration::from_millis(self.applied_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn stale_delay(&self) -> Duration {
        Duration::from_millis(self.stale_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Translate wire fields into a mirror patch
#[must_use]
pub fn patch_from_fields(fields: &MutationFields) -> NodePatch {
    NodePatch {
        status: fields.status.as_deref().map(Status::from),
        title: fields.title.clone(),
        assignee: fields.assignee.clone(),
        priority: fields.priority,
        issue_type: fields.issue_type.as_deref().map(IssueType::from),
    }
}

/// Applies push events and owns the refresh debounce
#[derive(Debug)]
pub struct MutationReconciler<M: Send + 'static> {
    mirror: SharedMirror,
    policy: RefreshPolicy,
    refresh: CancellableTask<M>,
    signals: broadcast::Sender<SyncSignal>,
    dropped: HashSet<Arc<str>>,
    forced: bool,
}

impl<M: Send + 'static> MutationReconciler<M> {
    /// Create reconciler; `refresh` posts the refresh-due message
    #[must_use]
    pub fn new(
        mirror: SharedMirror,
        policy: RefreshPolicy,
        refresh: CancellableTask<M>,
        signals: broadcast::Sender<SyncSignal>,
    ) -> Self {
        Self {
            mirror,
            policy,
            refresh,
            signals,
            dropped: HashSet::new(),
            forced: false,
        }
    }

    /// Refresh debounce windows
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Apply a mutation event; returns whether the mirror absorbed it
    pub fn apply(&mut self, event: &MutationEvent) -> bool {
        let applied = self.patch(event);
        let delay = if applied {
            self.policy.applied_delay()
        } else {
            self.policy.stale_delay()
        };
        tracing::debug!(
            kind = ?event.kind,
            id = event.target_id.as_deref().unwrap_or("-"),
            applied,
            delay_ms = millis(delay),
            "mutation reconciled"
        );
        self.arm(delay);
        applied
    }

    /// Track channel connectivity; returns whether a recovery refresh was forced
    pub fn observe_status(&mut self, stream: &Arc<str>, status: &ConnectionStatus) -> bool {
        match status.state {
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                self.dropped.insert(Arc::clone(stream));
                false
            }
            ConnectionState::Connected if self.dropped.remove(stream) => {
                tracing::info!(stream = %stream, "channel recovered, refreshing");
                self.refresh.schedule(self.policy.reconnect_delay());
                self.forced = true;
                true
            }
            ConnectionState::Connected | ConnectionState::Connecting => false,
        }
    }

    /// Forward bus traffic; returns whether it scheduled a refresh
    ///
    /// Only events naming an issue the mirror lacks schedule a refresh.
    pub fn on_bus_event(&mut self, event: BusEvent) -> bool {
        let unknown = event
            .issue_id
            .as_deref()
            .is_some_and(|id| !self.mirror.read().contains(id));
        let _ = self.signals.send(SyncSignal::Bus(event));
        if unknown {
            self.arm(self.policy.stale_delay());
        }
        unknown
    }

    /// Consume a refresh-due message; `true` if the refresh should run
    pub fn on_refresh_due(&mut self, generation: u64) -> bool {
        let due = self.refresh.accept(generation);
        if due {
            self.forced = false;
        }
        due
    }

    /// Whether a refresh is scheduled
    #[inline]
    #[must_use]
    pub fn refresh_pending(&self) -> bool {
        self.refresh.is_pending()
    }

    /// Drop any scheduled refresh
    pub fn cancel(&mut self) {
        self.refresh.cancel();
        self.forced = false;
    }

    fn arm(&mut self, delay: Duration) {
        if self.forced {
            if let Some(deadline) = self.refresh.deadline() {
                if deadline <= Instant::now() + delay {
                    return;
                }
            }
        }
        self.forced = false;
        self.refresh.schedule(delay);
    }

    fn patch(&self, event: &MutationEvent) -> bool {
        let Some(id) = event.target_id.as_deref() else {
            return false;
        };
        match event.kind {
            MutationKind::Status => {
                let Some(status) = event.fields.status.as_deref() else {
                    return false;
                };
                let to = Status::from(status);
                let previous = self.mirror.write().set_status(id, to.clone());
                let Some(from) = previous else {
                    return false;
                };
                if from != to {
                    let _ = self.signals.send(SyncSignal::StatusTransition {
                        id: NodeId::from(id),
                        from,
                        to,
                    });
                }
                true
            }
            MutationKind::Update => {
                let patch = patch_from_fields(&event.fields);
                let applied = self.mirror.write().apply_patch(id, &patch);
                if applied {
                    let _ = self.signals.send(SyncSignal::NodePatched {
                        id: NodeId::from(id),
                    });
                }
                applied
            }
            MutationKind::Create | MutationKind::Delete => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_graph::{GraphMerger, Snapshot, SnapshotNode};
    use beads_stream::Channel;
    use tokio::sync::mpsc;

    struct Fixture {
        reconciler: MutationReconciler<u64>,
        mirror: SharedMirror,
        due: mpsc::UnboundedReceiver<u64>,
        signals: broadcast::Receiver<SyncSignal>,
    }

    fn fixture() -> Fixture {
        let mut mirror = GraphMirror::new();
        GraphMerger::default().merge(
            &mut mirror,
            Snapshot::default().with_nodes([
                SnapshotNode::new("bd-1", "Fix login").with_priority(2),
                SnapshotNode::new("bd-2", "Ship it"),
            ]),
        );
        let mirror = Arc::new(RwLock::new(mirror));
        let (tx, due) = mpsc::unbounded_channel();
        let (signal_tx, signals) = broadcast::channel(16);
        let reconciler = MutationReconciler::new(
            Arc::clone(&mirror),
            RefreshPolicy::default(),
            CancellableTask::new(tx, |generation| generation),
            signal_tx,
        );
        Fixture {
            reconciler,
            mirror,
            due,
            signals,
        }
    }

    fn event(kind: MutationKind, id: &str, fields: MutationFields) -> MutationEvent {
        MutationEvent {
            kind,
            target_id: Some(id.into()),
            fields,
        }
    }

    /// Wait for the refresh and check it fired `expected` from now
    async fn assert_fires_after(fx: &mut Fixture, expected: Duration) {
        let started = Instant::now();
        let generation = fx.due.recv().await.unwrap();
        assert!(fx.reconciler.on_refresh_due(generation));
        let elapsed = started.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "fired after {elapsed:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_event_touches_only_status() {
        let mut fx = fixture();
        let before = fx.mirror.read().node("bd-1").unwrap().clone();

        let fields = MutationFields {
            status: Some("closed".into()),
            ..MutationFields::default()
        };
        assert!(fx.reconciler.apply(&event(MutationKind::Status, "bd-1", fields)));

        let after = fx.mirror.read().node("bd-1").unwrap().clone();
        assert_eq!(after.attrs.status, Status::Closed);
        assert_eq!(after.attrs.title, before.attrs.title);
        assert_eq!(after.attrs.priority, before.attrs.priority);
        assert_eq!(after.spatial, before.spatial);
        assert_eq!(
            fx.signals.try_recv().unwrap(),
            SyncSignal::StatusTransition {
                id: NodeId::from("bd-1"),
                from: Status::Open,
                to: Status::Closed,
            }
        );
        assert_fires_after(&mut fx, Duration::from_secs(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn create_never_mutates_and_schedules_short_refresh() {
        let mut fx = fixture();
        let fields = MutationFields {
            title: Some("New".into()),
            ..MutationFields::default()
        };
        assert!(!fx.reconciler.apply(&event(MutationKind::Create, "bd-9", fields)));
        assert_eq!(fx.mirror.read().node_count(), 2);
        assert!(!fx.mirror.read().contains("bd-9"));
        assert_fires_after(&mut fx, Duration::from_secs(3)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn update_patches_present_fields() {
        let mut fx = fixture();
        let fields = MutationFields {
            assignee: Some(Some("nux".into())),
            ..MutationFields::default()
        };
        assert!(fx.reconciler.apply(&event(MutationKind::Update, "bd-2", fields)));
        let node = fx.mirror.read().node("bd-2").unwrap().clone();
        assert_eq!(node.attrs.assignee.as_deref(), Some("nux"));
        assert_eq!(node.attrs.title, "Ship it");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_and_empty_update_use_short_window() {
        let mut fx = fixture();
        let status = MutationFields {
            status: Some("closed".into()),
            ..MutationFields::default()
        };
        assert!(!fx.reconciler.apply(&event(MutationKind::Status, "bd-404", status)));
        assert!(!fx
            .reconciler
            .apply(&event(MutationKind::Update, "bd-1", MutationFields::default())));
        assert_fires_after(&mut fx, Duration::from_secs(3)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_refresh() {
        let mut fx = fixture();
        for _ in 0..5 {
            let fields = MutationFields {
                status: Some("in_progress".into()),
                ..MutationFields::default()
            };
            fx.reconciler.apply(&event(MutationKind::Status, "bd-1", fields));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        // Last event was 1s ago; its 10s window is what fires
        assert_fires_after(&mut fx, Duration::from_secs(9)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(fx.due.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_forces_quick_refresh_not_postponed_by_events() {
        let mut fx = fixture();
        let stream: Arc<str> = Arc::from("mutations");
        let status = |state| ConnectionStatus {
            state,
            attempt: 0,
            delay: Duration::ZERO,
        };

        assert!(!fx.reconciler.observe_status(&stream, &status(ConnectionState::Connected)));
        assert!(!fx.reconciler.observe_status(&stream, &status(ConnectionState::Reconnecting)));
        assert!(fx.reconciler.observe_status(&stream, &status(ConnectionState::Connected)));
        // Repeated connected without a drop in between forces nothing more
        assert!(!fx.reconciler.observe_status(&stream, &status(ConnectionState::Connected)));

        let fields = MutationFields {
            status: Some("closed".into()),
            ..MutationFields::default()
        };
        fx.reconciler.apply(&event(MutationKind::Status, "bd-1", fields));
        assert_fires_after(&mut fx, Duration::from_millis(500)).await;

        assert!(!fx.reconciler.observe_status(&stream, &status(ConnectionState::Connected)));
        assert!(!fx.reconciler.refresh_pending());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fx.due.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn bus_event_for_unknown_issue_schedules_refresh() {
        let mut fx = fixture();
        let bus = |id: &str| BusEvent {
            channel: Channel::Hooks,
            kind: "hooked".into(),
            issue_id: Some(id.into()),
            payload: serde_json::Value::Null,
        };

        assert!(!fx.reconciler.on_bus_event(bus("bd-1")));
        assert!(!fx.reconciler.refresh_pending());
        assert!(matches!(fx.signals.try_recv(), Ok(SyncSignal::Bus(_))));

        assert!(fx.reconciler.on_bus_event(bus("bd-77")));
        assert_fires_after(&mut fx, Duration::from_secs(3)).await;
    }
}
