//! Beads Graph - local mirror of the issue graph
//!
//! Holds the nodes and links the renderer draws, and keeps them in step with
//! the backend without disturbing the layout:
//! - [`GraphMirror`]: id-keyed node and link tables with derived flags
//! - [`GraphMerger`]: folds an authoritative [`Snapshot`] into the mirror,
//!   preserving spatial state of surviving nodes
//! - [`PositionStabilizer`]: freezes pre-existing nodes while the layout
//!   settles after a structural change
//! - [`DependencyPropagationForce`]: per-tick pull of assigned work toward
//!   its agent
//!
//! The mirror is plain data. Sharing and scheduling live in `beads-sync`.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod force;
pub mod merge;
pub mod mirror;
pub mod snapshot;
pub mod stabilizer;
pub mod types;

pub use error::GraphError;
pub use force::{DependencyPropagationForce, ForceConfig, Tether};
pub use merge::{GraphMerger, MergeConfig, MergeOutcome};
pub use mirror::{AttributeCheckpoint, GraphMirror, NodePatch, ViewFilter};
pub use snapshot::{Snapshot, SnapshotEdge, SnapshotNode};
pub use stabilizer::{PositionStabilizer, StabilizerConfig};
pub use types::{
    DecisionState, DerivedFlags, GraphLink, GraphNode, IssueType, LinkKey, LinkKind,
    NodeAttributes, NodeId, PresentationHandle, Spatial, Status, Vec3,
};
