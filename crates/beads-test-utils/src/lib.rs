//! Testing utilities for the beads live workspace
//!
//! Scripted push transport, in-memory backends and graph fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use beads_graph::{
    IssueType, LinkKind, NodeId, NodePatch, Snapshot, SnapshotEdge, SnapshotNode, Status,
};
use beads_stream::{ByteStream, EventTransport, StreamError};
use beads_sync::{MutationBackend, SnapshotSource, SyncError};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Push transport
// ---------------------------------------------------------------------------

type Chunk = Result<Vec<u8>, StreamError>;

#[derive(Debug)]
enum Script {
    Fail,
    Open(mpsc::UnboundedReceiver<Chunk>),
}

/// What a connect does once a URL's script queue is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenEmpty {
    /// Open a stream that never delivers anything
    Hang,
    /// Refuse the connection
    Fail,
}

/// Writing end of a scripted stream; dropping it closes the stream
#[derive(Debug, Clone)]
pub struct Feed {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl Feed {
    /// Push raw bytes
    pub fn send_raw(&self, text: &str) {
        let _ = self.tx.send(Ok(text.as_bytes().to_vec()));
    }

    /// Push one SSE frame
    pub fn send_frame(&self, label: Option<&str>, data: &str) {
        self.send_raw(&sse_frame(label, data));
    }

    /// Push a mutation event
    pub fn send_mutation(&self, kind: &str, issue_id: &str, payload: Value) {
        self.send_frame(
            Some("mutations"),
            &json!({ "type": kind, "issue_id": issue_id, "payload": payload }).to_string(),
        );
    }

    /// Break the stream with a transport error
    pub fn fail(&self) {
        let _ = self.tx.send(Err(StreamError::Transport("connection reset".into())));
    }
}

/// Transport playing back per-URL scripts
#[derive(Debug)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    connects: Mutex<HashMap<String, usize>>,
    when_empty: WhenEmpty,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new(WhenEmpty::Hang)
    }
}

impl ScriptedTransport {
    pub fn new(when_empty: WhenEmpty) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            connects: Mutex::new(HashMap::new()),
            when_empty,
        }
    }

    /// Next connect to `url` fails
    pub fn push_fail(&self, url: &str) {
        self.scripts
            .lock()
            .entry(url.to_owned())
            .or_default()
            .push_back(Script::Fail);
    }

    /// Next connect to `url` succeeds; returns the writing end
    pub fn push_open(&self, url: &str) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .entry(url.to_owned())
            .or_default()
            .push_back(Script::Open(rx));
        Feed { tx }
    }

    /// Connects attempted against `url`
    pub fn connects(&self, url: &str) -> usize {
        self.connects.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<ByteStream, StreamError> {
        *self.connects.lock().entry(url.to_owned()).or_default() += 1;
        let script = self
            .scripts
            .lock()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        match (script, self.when_empty) {
            (Some(Script::Open(rx)), _) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })
            .boxed()),
            (None, WhenEmpty::Hang) => Ok(futures::stream::pending::<Chunk>().boxed()),
            (Some(Script::Fail), _) | (None, WhenEmpty::Fail) => {
                Err(StreamError::Transport("connection refused".into()))
            }
        }
    }
}

/// SSE text for one frame
pub fn sse_frame(label: Option<&str>, data: &str) -> String {
    let mut frame = String::new();
    if let Some(label) = label {
        frame.push_str("event: ");
        frame.push_str(label);
        frame.push('\n');
    }
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Snapshot source serving whatever was last set
#[derive(Debug, Default)]
pub struct StaticSnapshotSource {
    snapshot: Mutex<Snapshot>,
    latency: Mutex<Duration>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl StaticSnapshotSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Serve `snapshot` from now on
    pub fn set(&self, snapshot: Snapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Delay every fetch by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Make fetches fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fetches started so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn fetch(&self) -> Result<Snapshot, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Fetch("backend unavailable".into()));
        }
        Ok(self.snapshot.lock().clone())
    }
}

/// A call received by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Status { id: NodeId, status: Status },
    Fields { id: NodeId, patch: NodePatch },
    Close { id: NodeId, reason: Option<String> },
}

/// Mutation backend that records calls and optionally rejects them
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<RecordedCall>>,
    rejecting: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call from now on
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Calls so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn record(&self, id: &NodeId, call: RecordedCall) -> Result<(), SyncError> {
        self.calls.lock().push(call);
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(SyncError::Rejected {
                id: id.to_string(),
                reason: "HTTP 409".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MutationBackend for RecordingBackend {
    async fn update_status(&self, id: &NodeId, status: &Status) -> Result<(), SyncError> {
        self.record(
            id,
            RecordedCall::Status {
                id: id.clone(),
                status: status.clone(),
            },
        )
    }

    async fn update_fields(&self, id: &NodeId, patch: &NodePatch) -> Result<(), SyncError> {
        self.record(
            id,
            RecordedCall::Fields {
                id: id.clone(),
                patch: patch.clone(),
            },
        )
    }

    async fn close(&self, id: &NodeId, reason: Option<&str>) -> Result<(), SyncError> {
        self.record(
            id,
            RecordedCall::Close {
                id: id.clone(),
                reason: reason.map(str::to_owned),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Agent `gt-nux` working `bd-1`, which blocks `bd-2`, which blocks `bd-3`;
/// plus an open decision `bd-4`
pub fn sample_snapshot() -> Snapshot {
    Snapshot::default()
        .with_nodes([
            SnapshotNode::new("gt-nux", "nux").with_type(IssueType::Agent),
            SnapshotNode::new("bd-1", "Fix login")
                .with_status(Status::InProgress)
                .with_assignee("nux")
                .with_priority(1),
            SnapshotNode::new("bd-2", "Ship release"),
            SnapshotNode::new("bd-3", "Announce"),
            SnapshotNode::new("bd-4", "Pick a date").with_type(IssueType::Decision),
        ])
        .with_edges([
            SnapshotEdge::new("gt-nux", "bd-1", LinkKind::AssignedTo),
            SnapshotEdge::new("bd-1", "bd-2", LinkKind::Blocks),
            SnapshotEdge::new("bd-2", "bd-3", LinkKind::Blocks),
        ])
}

/// [`sample_snapshot`] plus `extra`, linked from `bd-3`
pub fn sample_snapshot_with(extra: &str) -> Snapshot {
    sample_snapshot()
        .with_nodes([SnapshotNode::new(extra, extra)])
        .with_edges([SnapshotEdge::new("bd-3", extra, LinkKind::Related)])
}
