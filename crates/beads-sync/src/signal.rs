//! Signals published to the rendering layer

use beads_graph::{NodeId, Status};
use beads_stream::{BusEvent, ConnectionState};
use std::fmt;

/// Aggregate connectivity across all channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub state: ConnectionState,
    /// Highest retry count among channels
    pub attempt: u32,
}

impl Connectivity {
    /// Create value
    #[inline]
    #[must_use]
    pub fn new(state: ConnectionState, attempt: u32) -> Self {
        Self { state, attempt }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(ConnectionState::Connecting, 0)
    }
}

/// Severity of a transient notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Change notification for subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    /// Nodes were added or removed, or links changed; rebuild the scene
    StructuralChange {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    /// Attributes of surviving nodes changed; restyle in place
    AttributesChanged { updated: Vec<NodeId> },
    /// A node's status flipped; drives the transition effect
    StatusTransition { id: NodeId, from: Status, to: Status },
    /// Fields of one node were patched from a push event
    NodePatched { id: NodeId },
    /// Aggregate connectivity changed
    Connectivity { state: ConnectionState, attempt: u32 },
    /// Stabilization pins were released
    PinsReleased { count: usize },
    /// Bus traffic (agents, hooks, decisions, mail)
    Bus(BusEvent),
    /// Transient user-facing message
    Notice { level: NoticeLevel, message: String },
}
