//! Optimistic user mutations
//!
//! Edits made in the UI show up immediately: the engine loop checkpoints the
//! affected nodes, applies the change to the mirror and only then is the
//! backend asked. If the backend rejects the edit, the checkpoint is
//! restored and a [`crate::SyncSignal::Notice`] tells the user.

use crate::backend::MutationBackend;
use crate::engine::EngineMsg;
use crate::error::SyncError;
use beads_graph::{AttributeCheckpoint, NodeId, NodePatch, Status};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle for user-initiated edits
#[derive(Debug, Clone)]
pub struct OptimisticMutator {
    commands: mpsc::UnboundedSender<EngineMsg>,
    backend: Arc<dyn MutationBackend>,
}

impl OptimisticMutator {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<EngineMsg>,
        backend: Arc<dyn MutationBackend>,
    ) -> Self {
        Self { commands, backend }
    }

    /// Change one issue's status
    ///
    /// # Errors
    /// `UnknownNode` before anything changes; `Rejected` (or a transport
    /// error) after the local change was rolled back
    pub async fn set_status(&self, id: &str, status: Status) -> Result<(), SyncError> {
        let id = NodeId::from(id);
        let patch = NodePatch::default().with_status(status.clone());
        let checkpoint = self.stage(vec![id.clone()], patch).await?;
        let result = self.backend.update_status(&id, &status).await;
        self.settle(checkpoint, result)
    }

    /// Close one issue
    ///
    /// # Errors
    /// As [`Self::set_status`]
    pub async fn close(&self, id: &str, reason: Option<&str>) -> Result<(), SyncError> {
        let id = NodeId::from(id);
        let patch = NodePatch::default().with_status(Status::Closed);
        let checkpoint = self.stage(vec![id.clone()], patch).await?;
        let result = self.backend.close(&id, reason).await;
        self.settle(checkpoint, result)
    }

    /// Apply the same patch to several issues
    ///
    /// All nodes are rolled back if any backend call fails. Calls that did
    /// succeed are corrected by the next snapshot.
    ///
    /// # Errors
    /// As [`Self::set_status`]
    pub async fn bulk_update(&self, ids: &[&str], patch: NodePatch) -> Result<(), SyncError> {
        let ids: Vec<NodeId> = ids.iter().copied().map(NodeId::from).collect();
        let checkpoint = self.stage(ids.clone(), patch.clone()).await?;
        let result = try_join_all(ids.iter().map(|id| self.backend.update_fields(id, &patch)))
            .await
            .map(|_| ());
        self.settle(checkpoint, result)
    }

    async fn stage(
        &self,
        ids: Vec<NodeId>,
        patch: NodePatch,
    ) -> Result<AttributeCheckpoint, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineMsg::Stage { ids, patch, reply })
            .map_err(|_| SyncError::Closed)?;
        response.await.map_err(|_| SyncError::Closed)?
    }

    fn settle(
        &self,
        checkpoint: AttributeCheckpoint,
        result: Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        if let Err(err) = &result {
            tracing::warn!(nodes = checkpoint.len(), error = %err, "mutation rejected, rolling back");
            let _ = self.commands.send(EngineMsg::Rollback {
                checkpoint,
                reason: err.to_string(),
            });
        }
        result
    }
}
