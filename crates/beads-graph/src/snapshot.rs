//! Authoritative graph snapshot
//!
//! Shape returned by the backend's graph endpoint:
//! `{ nodes: [...], edges: [{source, target, type}], stats: {...} }`.

use crate::error::GraphError;
use crate::types::{IssueType, LinkKind, NodeAttributes, NodeId, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full graph snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: Vec<SnapshotNode>,
    #[serde(default)]
    pub edges: Vec<SnapshotEdge>,
    #[serde(default)]
    pub stats: Value,
}

impl Snapshot {
    /// Decode a snapshot body
    ///
    /// # Errors
    /// `GraphError::Decode` when the body is not a valid snapshot
    pub fn from_json(body: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(body)?)
    }

    /// With nodes
    #[inline]
    #[must_use]
    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = SnapshotNode>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// With edges
    #[inline]
    #[must_use]
    pub fn with_edges(mut self, edges: impl IntoIterator<Item = SnapshotEdge>) -> Self {
        self.edges.extend(edges);
        self
    }
}

/// Issue as delivered in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: NodeId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default, rename = "type", alias = "issue_type")]
    pub issue_type: IssueType,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SnapshotNode {
    /// Create open task node
    #[must_use]
    pub fn new(id: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: Status::default(),
            priority: None,
            issue_type: IssueType::default(),
            assignee: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// With issue type
    #[inline]
    #[must_use]
    pub fn with_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = issue_type;
        self
    }

    /// With assignee
    #[inline]
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Attribute view of this node
    #[must_use]
    pub fn attributes(&self) -> NodeAttributes {
        NodeAttributes {
            title: self.title.clone(),
            status: self.status.clone(),
            priority: self.priority,
            issue_type: self.issue_type.clone(),
            assignee: self.assignee.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Dependency as delivered in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, rename = "type")]
    pub kind: LinkKind,
}

impl SnapshotEdge {
    /// Create edge
    #[inline]
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, kind: LinkKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }
}
