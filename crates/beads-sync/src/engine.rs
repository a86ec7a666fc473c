//! Sync engine
//!
//! [`SyncEngine::init`] opens the push channels and spawns one owning loop
//! that serializes every mirror mutation:
//! - Stream events go through the [`MutationReconciler`]
//! - Refresh and pin-release timers post back into the loop
//! - Snapshot fetches run as spawned tasks, one at a time; requests made
//!   while a fetch is in flight coalesce into a single follow-up fetch
//! - A poll interval refreshes in the background; its first tick is the
//!   initial load
//!
//! Readers share the mirror through a `parking_lot::RwLock` and follow
//! changes through [`SyncSignal`]s.

use crate::backend::{MutationBackend, SnapshotSource};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::optimistic::OptimisticMutator;
use crate::reconciler::{MutationReconciler, SharedMirror};
use crate::signal::{Connectivity, NoticeLevel, SyncSignal};
use crate::task::CancellableTask;
use beads_graph::{
    AttributeCheckpoint, DependencyPropagationForce, GraphMerger, GraphMirror, NodeId, NodePatch,
    PositionStabilizer, Snapshot,
};
use beads_stream::{
    ConnectionManager, ConnectionState, EventTransport, StreamBody, StreamEvent, StreamMessage,
    DEFAULT_QUEUE_CAPACITY,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the signal broadcast
pub const SIGNAL_CAPACITY: usize = 1024;

/// Channel name of the mutation stream
pub const MUTATION_STREAM: &str = "mutations";

/// Channel name of the event bus
pub const BUS_STREAM: &str = "bus";

/// Messages handled by the engine loop
#[derive(Debug)]
pub(crate) enum EngineMsg {
    RefreshDue(u64),
    PinRelease(u64),
    Fetched(Result<Snapshot, SyncError>),
    ReconnectAll,
    RefreshNow,
    Stage {
        ids: Vec<NodeId>,
        patch: NodePatch,
        reply: oneshot::Sender<Result<AttributeCheckpoint, SyncError>>,
    },
    Rollback {
        checkpoint: AttributeCheckpoint,
        reason: String,
    },
    Shutdown,
}

/// Running synchronization context
///
/// Dropping the engine aborts its loop; [`SyncEngine::teardown`] stops it
/// cleanly.
#[derive(Debug)]
pub struct SyncEngine {
    mirror: SharedMirror,
    signals: broadcast::Sender<SyncSignal>,
    connectivity: watch::Receiver<Connectivity>,
    commands: mpsc::UnboundedSender<EngineMsg>,
    backend: Arc<dyn MutationBackend>,
    force: DependencyPropagationForce,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Open channels and start the engine loop
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// `SyncError::Config` if `config` does not validate
    pub fn init(
        config: SyncConfig,
        transport: Arc<dyn EventTransport>,
        source: Arc<dyn SnapshotSource>,
        backend: Arc<dyn MutationBackend>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let mirror: SharedMirror = Arc::new(RwLock::new(GraphMirror::with_filter(
            config.filter.clone(),
        )));
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let (connectivity_tx, connectivity) = watch::channel(Connectivity::default());

        let channels = ConnectionManager::new(events, config.backoff);
        channels.open(
            MUTATION_STREAM,
            config.mutation_stream_url(),
            Arc::clone(&transport),
        );
        if let Some(url) = config.bus_stream_url() {
            channels.open(BUS_STREAM, url, transport);
        }

        let engine_loop = EngineLoop {
            mirror: Arc::clone(&mirror),
            signals: signals.clone(),
            connectivity: connectivity_tx,
            commands: commands.clone(),
            source,
            reconciler: MutationReconciler::new(
                Arc::clone(&mirror),
                config.refresh,
                CancellableTask::new(commands.clone(), EngineMsg::RefreshDue),
                signals.clone(),
            ),
            merger: GraphMerger::new(config.merge),
            stabilizer: PositionStabilizer::new(config.stabilizer),
            pin_release: CancellableTask::new(commands.clone(), EngineMsg::PinRelease),
            channels,
            poll_interval: config.poll_interval(),
            fetch: None,
            fetch_again: false,
        };
        let task = tokio::spawn(engine_loop.run(event_rx, command_rx));

        tracing::info!(
            base_url = %config.base_url,
            poll_ms = config.poll_interval_ms,
            "sync engine started"
        );

        Ok(Self {
            mirror,
            signals,
            connectivity,
            commands,
            backend,
            force: DependencyPropagationForce::new(config.force),
            task: Mutex::new(Some(task)),
        })
    }

    /// Shared mirror
    #[inline]
    #[must_use]
    pub fn mirror(&self) -> SharedMirror {
        Arc::clone(&self.mirror)
    }

    /// Subscribe to change signals
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.signals.subscribe()
    }

    /// Current aggregate connectivity
    #[inline]
    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    /// Follow aggregate connectivity
    #[inline]
    #[must_use]
    pub fn watch_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }

    /// Handle for optimistic user edits
    #[must_use]
    pub fn mutator(&self) -> OptimisticMutator {
        OptimisticMutator::new(self.commands.clone(), Arc::clone(&self.backend))
    }

    /// Run one tick of the dependency propagation force
    pub fn apply_force(&self, alpha: f64) -> usize {
        self.force.apply(&mut self.mirror.write(), alpha)
    }

    /// Retry every channel now, skipping any pending backoff
    ///
    /// # Errors
    /// `SyncError::Closed` after teardown
    pub fn reconnect_all(&self) -> Result<(), SyncError> {
        self.send(EngineMsg::ReconnectAll)
    }

    /// Fetch a snapshot now
    ///
    /// # Errors
    /// `SyncError::Closed` after teardown
    pub fn refresh_now(&self) -> Result<(), SyncError> {
        self.send(EngineMsg::RefreshNow)
    }

    /// Whether the loop has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Stop channels, timers and the loop; idempotent
    pub async fn teardown(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        let _ = self.commands.send(EngineMsg::Shutdown);
        if let Err(err) = task.await {
            if !err.is_cancelled() {
                tracing::warn!(error = %err, "sync engine loop panicked");
            }
        }
    }

    /// Alias of [`Self::teardown`]
    pub async fn destroy(&self) {
        self.teardown().await;
    }

    fn send(&self, message: EngineMsg) -> Result<(), SyncError> {
        if self.task.lock().is_none() {
            return Err(SyncError::Closed);
        }
        self.commands.send(message).map_err(|_| SyncError::Closed)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// State owned by the engine loop
struct EngineLoop {
    mirror: SharedMirror,
    signals: broadcast::Sender<SyncSignal>,
    connectivity: watch::Sender<Connectivity>,
    commands: mpsc::UnboundedSender<EngineMsg>,
    source: Arc<dyn SnapshotSource>,
    reconciler: MutationReconciler<EngineMsg>,
    merger: GraphMerger,
    stabilizer: PositionStabilizer,
    pin_release: CancellableTask<EngineMsg>,
    channels: ConnectionManager,
    poll_interval: Duration,
    fetch: Option<JoinHandle<()>>,
    fetch_again: bool,
}

impl EngineLoop {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<StreamMessage>,
        mut commands: mpsc::UnboundedReceiver<EngineMsg>,
    ) {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(message) = events.recv() => self.on_stream(message),
                Some(command) = commands.recv() => {
                    if !self.on_command(command) {
                        break;
                    }
                }
                _ = poll.tick() => self.request_fetch("poll"),
            }
        }

        self.shutdown();
    }

    fn emit(&self, signal: SyncSignal) {
        let _ = self.signals.send(signal);
    }

    fn on_stream(&mut self, message: StreamMessage) {
        match message.body {
            StreamBody::Event(StreamEvent::Mutation(event)) => {
                self.reconciler.apply(&event);
            }
            StreamBody::Event(StreamEvent::Bus(event)) => {
                self.reconciler.on_bus_event(event);
            }
            StreamBody::Status(status) => {
                if matches!(
                    status.state,
                    ConnectionState::Reconnecting | ConnectionState::Disconnected
                ) {
                    tracing::warn!(
                        stream = %message.stream,
                        state = %status.state,
                        attempt = status.attempt,
                        "channel down"
                    );
                }
                self.reconciler.observe_status(&message.stream, &status);
                self.publish_connectivity();
            }
        }
    }

    /// Returns `false` when the loop should stop
    fn on_command(&mut self, command: EngineMsg) -> bool {
        match command {
            EngineMsg::RefreshDue(generation) => {
                if self.reconciler.on_refresh_due(generation) {
                    self.request_fetch("debounce");
                }
            }
            EngineMsg::PinRelease(generation) => {
                if self.pin_release.accept(generation) {
                    let count = self.stabilizer.release(&mut self.mirror.write());
                    tracing::debug!(count, "positions released");
                    if count > 0 {
                        self.emit(SyncSignal::PinsReleased { count });
                    }
                }
            }
            EngineMsg::Fetched(result) => {
                self.fetch = None;
                match result {
                    Ok(snapshot) => self.apply_snapshot(snapshot),
                    Err(err) => tracing::warn!(error = %err, "snapshot fetch failed"),
                }
                if std::mem::take(&mut self.fetch_again) {
                    self.request_fetch("coalesced");
                }
            }
            EngineMsg::ReconnectAll => self.channels.reconnect_all(),
            EngineMsg::RefreshNow => {
                self.reconciler.cancel();
                self.request_fetch("manual");
            }
            EngineMsg::Stage { ids, patch, reply } => {
                let _ = reply.send(self.stage(&ids, &patch));
            }
            EngineMsg::Rollback { checkpoint, reason } => self.rollback(&checkpoint, reason),
            EngineMsg::Shutdown => return false,
        }
        true
    }

    fn request_fetch(&mut self, reason: &'static str) {
        if self.fetch.is_some() {
            self.fetch_again = true;
            tracing::debug!(reason, "fetch in flight, coalescing");
            return;
        }
        tracing::debug!(reason, "fetching snapshot");
        let source = Arc::clone(&self.source);
        let commands = self.commands.clone();
        self.fetch = Some(tokio::spawn(async move {
            let result = source.fetch().await;
            let _ = commands.send(EngineMsg::Fetched(result));
        }));
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let outcome = {
            let mut mirror = self.mirror.write();
            let outcome = self.merger.merge(&mut mirror, snapshot);
            if self.stabilizer.stabilize(&mut mirror, &outcome).is_some() {
                self.pin_release.schedule(self.stabilizer.settle_window());
            }
            outcome
        };

        if outcome.structural_change {
            tracing::info!(
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                "graph structure changed"
            );
            self.emit(SyncSignal::StructuralChange {
                added: outcome.added,
                removed: outcome.removed,
            });
        }
        if !outcome.updated.is_empty() {
            self.emit(SyncSignal::AttributesChanged {
                updated: outcome.updated,
            });
        }
    }

    fn stage(
        &self,
        ids: &[NodeId],
        patch: &NodePatch,
    ) -> Result<AttributeCheckpoint, SyncError> {
        let mut transitions = Vec::new();
        let checkpoint = {
            let mut mirror = self.mirror.write();
            if let Some(missing) = ids.iter().find(|id| !mirror.contains(id.as_str())) {
                return Err(SyncError::UnknownNode(missing.to_string()));
            }
            let checkpoint = mirror.checkpoint(ids.iter().map(NodeId::as_str));
            for id in ids {
                let from = mirror.node(id.as_str()).map(|node| node.attrs.status.clone());
                mirror.apply_patch(id.as_str(), patch);
                if let (Some(from), Some(to)) = (from, patch.status.clone()) {
                    if from != to {
                        transitions.push((id.clone(), from, to));
                    }
                }
            }
            checkpoint
        };

        for id in ids {
            self.emit(SyncSignal::NodePatched { id: id.clone() });
        }
        for (id, from, to) in transitions {
            self.emit(SyncSignal::StatusTransition { id, from, to });
        }
        Ok(checkpoint)
    }

    fn rollback(&self, checkpoint: &AttributeCheckpoint, reason: String) {
        let restored = self.mirror.write().restore(checkpoint);
        tracing::info!(restored, "optimistic change rolled back");
        self.emit(SyncSignal::AttributesChanged {
            updated: checkpoint.ids().cloned().collect(),
        });
        self.emit(SyncSignal::Notice {
            level: NoticeLevel::Error,
            message: format!("Change reverted: {reason}"),
        });
    }

    fn publish_connectivity(&self) {
        let next = Connectivity::new(self.channels.aggregate_state(), self.channels.max_attempt());
        let changed = self.connectivity.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.emit(SyncSignal::Connectivity {
                state: next.state,
                attempt: next.attempt,
            });
        }
    }

    fn shutdown(&mut self) {
        self.reconciler.cancel();
        self.pin_release.cancel();
        self.channels.stop_all();
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        let released = self.stabilizer.release(&mut self.mirror.write());
        tracing::info!(released, "sync engine stopped");
    }
}
