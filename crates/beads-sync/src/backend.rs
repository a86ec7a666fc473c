//! Backend seams
//!
//! The engine reads snapshots through [`SnapshotSource`] and writes user
//! edits through [`MutationBackend`]. [`crate::HttpBackend`] implements both
//! against the beads HTTP API; tests substitute in-memory doubles.

use crate::error::SyncError;
use async_trait::async_trait;
use beads_graph::{NodeId, NodePatch, Snapshot, Status};
use std::fmt::Debug;

/// Source of authoritative graph snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync + Debug {
    /// Fetch the full graph
    async fn fetch(&self) -> Result<Snapshot, SyncError>;
}

/// Sink for user-initiated edits
#[async_trait]
pub trait MutationBackend: Send + Sync + Debug {
    /// Change the status of one issue
    async fn update_status(&self, id: &NodeId, status: &Status) -> Result<(), SyncError>;

    /// Change arbitrary fields of one issue
    async fn update_fields(&self, id: &NodeId, patch: &NodePatch) -> Result<(), SyncError>;

    /// Close one issue
    async fn close(&self, id: &NodeId, reason: Option<&str>) -> Result<(), SyncError>;
}
