//! Core graph types
//!
//! Defines the entities mirrored from the backend:
//! - Node identity and attributes
//! - Ephemeral spatial state owned by the layout
//! - Derived presentation flags
//! - Link identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

/// Stable issue identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declares a wire enum with known variants and an `Other` fallback,
/// serialized as its lowercase string.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)? }
        default $default:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// Value this client does not know
            Other(String),
        }

        impl $name {
            /// Wire string
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $wire, )+
                    Self::Other(other) => other.as_str(),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                match value {
                    $( $wire => Self::$variant, )+
                    other => Self::Other(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from(value.as_str())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_owned()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Issue workflow status
    Status {
        /// Ready to be picked up
        Open => "open",
        /// Being worked on
        InProgress => "in_progress",
        /// Waiting on something
        Blocked => "blocked",
        /// Parked for later
        Deferred => "deferred",
        /// Attached to an agent's hook
        Hooked => "hooked",
        /// Done
        Closed => "closed",
    }
    default Open
}

impl Status {
    /// Whether the issue is finished
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

wire_enum! {
    /// Issue type
    IssueType {
        /// Unit of work
        Task => "task",
        /// Defect
        Bug => "bug",
        /// New capability
        Feature => "feature",
        /// Group of issues
        Epic => "epic",
        /// Maintenance
        Chore => "chore",
        /// Autonomous agent
        Agent => "agent",
        /// Decision point awaiting a human
        Decision => "decision",
    }
    default Task
}

impl IssueType {
    /// Agent entity
    #[inline]
    #[must_use]
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent)
    }

    /// Decision entity
    #[inline]
    #[must_use]
    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Decision)
    }
}

wire_enum! {
    /// Relation carried by a link
    LinkKind {
        /// Source blocks target
        Blocks => "blocks",
        /// Hierarchy
        ParentChild => "parent-child",
        /// Loose association
        Related => "related",
        /// Target was discovered while working on source
        DiscoveredFrom => "discovered-from",
        /// Agent (source) works on target
        AssignedTo => "assigned_to",
    }
    default Related
}

/// Point or displacement in scene space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Origin
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Create vector
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length
    #[inline]
    #[must_use]
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Layout state of a node
///
/// Written by the layout engine, and for existing nodes only by the merge and
/// stabilization passes of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spatial {
    /// Current position; `None` until the layout places the node
    pub position: Option<Vec3>,
    /// Current velocity
    pub velocity: Vec3,
    /// Fixed coordinates overriding the simulation
    pub pin: Option<Vec3>,
}

impl Spatial {
    /// Whether the simulation may move this node
    #[inline]
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }
}

/// Mutable issue attributes mirrored from the backend
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeAttributes {
    pub title: String,
    pub status: Status,
    pub priority: Option<i64>,
    pub issue_type: IssueType,
    pub assignee: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// State of a decision node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionState {
    /// Awaiting an answer
    Pending,
    /// Answered
    Resolved,
}

/// Flags recomputed from attributes, links and the view filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivedFlags {
    /// Filtered out of the view
    pub hidden: bool,
    /// An unfinished issue blocks this one
    pub blocked: bool,
    /// Set for decision nodes only
    pub decision_state: Option<DecisionState>,
}

/// Opaque reference to the renderer's object for a node or link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresentationHandle(pub u64);

/// Mirrored issue
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Identity; never reassigned
    pub id: NodeId,
    /// Backend attributes
    pub attrs: NodeAttributes,
    /// Layout state
    pub spatial: Spatial,
    /// Derived flags
    pub flags: DerivedFlags,
    /// Renderer object, if one is attached
    pub presentation: Option<PresentationHandle>,
}

impl GraphNode {
    /// Create unpositioned node
    #[inline]
    #[must_use]
    pub fn new(id: NodeId, attrs: NodeAttributes) -> Self {
        Self {
            id,
            attrs,
            spatial: Spatial::default(),
            flags: DerivedFlags::default(),
            presentation: None,
        }
    }

    /// Current position
    #[inline]
    #[must_use]
    pub fn position(&self) -> Option<Vec3> {
        self.spatial.position
    }
}

/// Composite link identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: LinkKind,
}

impl LinkKey {
    /// Create key
    #[inline]
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, kind: LinkKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }

    /// Whether `id` is either endpoint
    #[inline]
    #[must_use]
    pub fn touches(&self, id: &str) -> bool {
        self.source.as_str() == id || self.target.as_str() == id
    }
}

/// Mirrored link
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLink {
    /// Identity
    pub key: LinkKey,
    /// Renderer object, if one is attached
    pub presentation: Option<PresentationHandle>,
}

impl GraphLink {
    /// Create link
    #[inline]
    #[must_use]
    pub fn new(key: LinkKey) -> Self {
        Self {
            key,
            presentation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_known_and_unknown() {
        assert_eq!(Status::from("in_progress"), Status::InProgress);
        assert_eq!(Status::from("tombstone"), Status::Other("tombstone".into()));
        let json = serde_json::to_string(&Status::Closed).unwrap();
        assert_eq!(json, "\"closed\"");
        let parsed: Status = serde_json::from_str("\"pinned\"").unwrap();
        assert_eq!(parsed.as_str(), "pinned");
    }

    #[test]
    fn link_kind_wire_names() {
        assert_eq!(LinkKind::from("parent-child"), LinkKind::ParentChild);
        assert_eq!(LinkKind::AssignedTo.to_string(), "assigned_to");
        assert_eq!(LinkKind::default(), LinkKind::Related);
    }

    #[test]
    fn vec3_arithmetic() {
        let a = Vec3::new(3.0, 4.0, 0.0);
        assert_eq!(a.length(), 5.0);
        assert_eq!(a - a, Vec3::ZERO);
        assert_eq!((a + a) * 0.5, a);
    }

    #[test]
    fn link_key_touches_endpoints() {
        let key = LinkKey::new("a", "b", LinkKind::Blocks);
        assert!(key.touches("a"));
        assert!(key.touches("b"));
        assert!(!key.touches("c"));
    }
}
