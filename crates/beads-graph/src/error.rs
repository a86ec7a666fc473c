//! Error types for the graph mirror

use crate::types::NodeId;

/// Graph mirror errors
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Snapshot body could not be decoded
    #[error("snapshot decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Operation named a node the mirror does not hold
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
}
