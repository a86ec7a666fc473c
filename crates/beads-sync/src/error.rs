//! Error types for the sync engine

use beads_graph::GraphError;
use beads_stream::StreamError;

/// Sync engine errors
///
/// Nothing here is fatal to the engine. Fetch failures are retried on the
/// next poll; rejected mutations are rolled back locally.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Snapshot could not be fetched or decoded
    #[error("snapshot fetch failed: {0}")]
    Fetch(String),

    /// Backend refused a mutation
    #[error("mutation of {id} rejected: {reason}")]
    Rejected { id: String, reason: String },

    /// Operation named a node the mirror does not hold
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Engine was torn down
    #[error("sync engine closed")]
    Closed,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl SyncError {
    /// Whether retrying the same operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::Stream(err) => !err.is_refusal(),
            Self::Rejected { .. }
            | Self::UnknownNode(_)
            | Self::Closed
            | Self::Config(_)
            | Self::Graph(_) => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::Fetch("timeout".into()).is_retryable());
        assert!(SyncError::Stream(StreamError::HttpStatus(503)).is_retryable());
        assert!(!SyncError::Stream(StreamError::HttpStatus(404)).is_retryable());
        assert!(!SyncError::Closed.is_retryable());
        assert!(!SyncError::Rejected {
            id: "bd-1".into(),
            reason: "HTTP 409".into()
        }
        .is_retryable());
    }

    #[test]
    fn rejected_display_names_node() {
        let err = SyncError::Rejected {
            id: "bd-7".into(),
            reason: "HTTP 409".into(),
        };
        assert_eq!(err.to_string(), "mutation of bd-7 rejected: HTTP 409");
    }
}
