//! In-memory graph mirror
//!
//! Id-keyed node and link tables in insertion order. The mirror is the only
//! owner of graph entities; the renderer holds opaque presentation handles
//! and reads positions back out.
//!
//! Derived flags (`hidden`, `blocked`, `decision_state`) are recomputed after
//! every attribute or structure change so readers never see stale flags.

use crate::types::{
    DecisionState, GraphLink, GraphNode, IssueType, LinkKey, LinkKind, NodeAttributes, NodeId,
    PresentationHandle, Spatial, Status, Vec3,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Which nodes the view hides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewFilter {
    /// Statuses filtered out
    pub hidden_statuses: Vec<Status>,
    /// Issue types filtered out
    pub hidden_types: Vec<IssueType>,
    /// Hide finished issues
    pub hide_closed: bool,
}

impl ViewFilter {
    /// Hide closed issues
    #[inline]
    #[must_use]
    pub fn with_hide_closed(mut self, hide: bool) -> Self {
        self.hide_closed = hide;
        self
    }

    /// Also hide `status`
    #[inline]
    #[must_use]
    pub fn with_hidden_status(mut self, status: Status) -> Self {
        self.hidden_statuses.push(status);
        self
    }

    /// Also hide `issue_type`
    #[inline]
    #[must_use]
    pub fn with_hidden_type(mut self, issue_type: IssueType) -> Self {
        self.hidden_types.push(issue_type);
        self
    }

    /// Whether a node with these attributes is filtered out
    #[must_use]
    pub fn hides(&self, attrs: &NodeAttributes) -> bool {
        (self.hide_closed && attrs.status.is_closed())
            || self.hidden_statuses.contains(&attrs.status)
            || self.hidden_types.contains(&attrs.issue_type)
    }
}

/// Partial attribute update
///
/// Absent fields are left untouched. `assignee: Some(None)` clears the
/// assignee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub issue_type: Option<IssueType>,
}

impl NodePatch {
    /// Set status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set or clear assignee
    #[inline]
    #[must_use]
    pub fn with_assignee(mut self, assignee: Option<String>) -> Self {
        self.assignee = Some(assignee);
        self
    }

    /// Set priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set issue type
    #[inline]
    #[must_use]
    pub fn with_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = Some(issue_type);
        self
    }

    /// Whether the patch changes nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.title.is_none()
            && self.assignee.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
    }

    fn apply_to(&self, attrs: &mut NodeAttributes) {
        if let Some(status) = &self.status {
            attrs.status = status.clone();
        }
        if let Some(title) = &self.title {
            attrs.title.clone_from(title);
        }
        if let Some(assignee) = &self.assignee {
            attrs.assignee.clone_from(assignee);
        }
        if let Some(priority) = self.priority {
            attrs.priority = Some(priority);
        }
        if let Some(issue_type) = &self.issue_type {
            attrs.issue_type = issue_type.clone();
        }
    }
}

/// Attributes captured before an optimistic change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeCheckpoint {
    entries: Vec<(NodeId, NodeAttributes)>,
}

impl AttributeCheckpoint {
    /// Captured ids
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Number of captured nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was captured
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Local copy of the issue graph
#[derive(Debug, Clone, Default)]
pub struct GraphMirror {
    pub(crate) nodes: IndexMap<NodeId, GraphNode>,
    pub(crate) links: IndexMap<LinkKey, GraphLink>,
    pub(crate) stats: Value,
    filter: ViewFilter,
}

impl GraphMirror {
    /// Create empty mirror
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty mirror with a view filter
    #[inline]
    #[must_use]
    pub fn with_filter(filter: ViewFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Node by id
    #[inline]
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Whether `id` is mirrored
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// All links in insertion order
    pub fn links(&self) -> impl Iterator<Item = &GraphLink> {
        self.links.values()
    }

    /// Link by key
    #[inline]
    #[must_use]
    pub fn link(&self, key: &LinkKey) -> Option<&GraphLink> {
        self.links.get(key)
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of links
    #[inline]
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Backend statistics from the last snapshot
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &Value {
        &self.stats
    }

    /// Active view filter
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    /// Replace the view filter and recompute `hidden`
    pub fn set_filter(&mut self, filter: ViewFilter) {
        self.filter = filter;
        self.recompute_flags();
    }

    /// Set the status of a known node
    ///
    /// Returns the previous status, or `None` if the node is unknown.
    pub fn set_status(&mut self, id: &str, status: Status) -> Option<Status> {
        let node = self.nodes.get_mut(id)?;
        let previous = std::mem::replace(&mut node.attrs.status, status);
        self.recompute_flags();
        Some(previous)
    }

    /// Apply the present fields of `patch` to a known node
    ///
    /// Returns `false` when the node is unknown or the patch is empty.
    pub fn apply_patch(&mut self, id: &str, patch: &NodePatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        patch.apply_to(&mut node.attrs);
        self.recompute_flags();
        true
    }

    /// Capture attributes of the known ids among `ids`
    #[must_use]
    pub fn checkpoint<'a, I>(&self, ids: I) -> AttributeCheckpoint
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = ids
            .into_iter()
            .filter_map(|id| {
                self.nodes
                    .get_key_value(id)
                    .map(|(key, node)| (key.clone(), node.attrs.clone()))
            })
            .collect();
        AttributeCheckpoint { entries }
    }

    /// Put checkpointed attributes back; returns how many nodes were restored
    ///
    /// Nodes removed since the checkpoint are skipped.
    pub fn restore(&mut self, checkpoint: &AttributeCheckpoint) -> usize {
        let mut restored = 0;
        for (id, attrs) in &checkpoint.entries {
            if let Some(node) = self.nodes.get_mut(id.as_str()) {
                node.attrs = attrs.clone();
                restored += 1;
            }
        }
        if restored > 0 {
            self.recompute_flags();
        }
        restored
    }

    /// Ids linked to `id` in either direction
    #[must_use]
    pub fn neighbors(&self, id: &str) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        self.links
            .keys()
            .filter_map(|key| {
                if key.source.as_str() == id {
                    Some(&key.target)
                } else if key.target.as_str() == id {
                    Some(&key.source)
                } else {
                    None
                }
            })
            .filter(|other| seen.insert(*other))
            .collect()
    }

    /// Record the layout position of a node
    ///
    /// Used by the layout engine after each simulation step. Returns `false`
    /// for unknown ids.
    pub fn set_position(&mut self, id: &str, position: Vec3) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.spatial.position = Some(position);
                true
            }
            None => false,
        }
    }

    /// Spatial state of a node
    #[inline]
    #[must_use]
    pub fn spatial(&self, id: &str) -> Option<&Spatial> {
        self.nodes.get(id).map(|node| &node.spatial)
    }

    /// Attach the renderer's object for a node
    pub fn attach_presentation(&mut self, id: &str, handle: PresentationHandle) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.presentation = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Attach the renderer's object for a link
    pub fn attach_link_presentation(&mut self, key: &LinkKey, handle: PresentationHandle) -> bool {
        match self.links.get_mut(key) {
            Some(link) => {
                link.presentation = Some(handle);
                true
            }
            None => false,
        }
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id)
    }

    /// Recompute every node's derived flags
    pub(crate) fn recompute_flags(&mut self) {
        let blocked: HashSet<&str> = self
            .links
            .keys()
            .filter(|key| key.kind == LinkKind::Blocks)
            .filter(|key| {
                self.nodes
                    .get(key.source.as_str())
                    .is_some_and(|source| !source.attrs.status.is_closed())
            })
            .map(|key| key.target.as_str())
            .collect();

        let flags: Vec<_> = self
            .nodes
            .values()
            .map(|node| {
                let decision_state = node.attrs.issue_type.is_decision().then(|| {
                    if node.attrs.status.is_closed() {
                        DecisionState::Resolved
                    } else {
                        DecisionState::Pending
                    }
                });
                (
                    self.filter.hides(&node.attrs),
                    blocked.contains(node.id.as_str()),
                    decision_state,
                )
            })
            .collect();

        for (node, (hidden, blocked, decision_state)) in self.nodes.values_mut().zip(flags) {
            node.flags.hidden = hidden;
            node.flags.blocked = blocked;
            node.flags.decision_state = decision_state;
        }
    }
}
