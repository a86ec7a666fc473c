//! Position stabilization after structural merges
//!
//! When nodes or links appear or disappear the layout reheats. To keep the
//! existing picture still while newcomers settle, every pre-existing
//! positioned node that is not already pinned is pinned where it stands.
//! After the settle window the engine releases exactly that pin set. A newer
//! structural merge releases the older set before pinning again.

use crate::merge::MergeOutcome;
use crate::mirror::GraphMirror;
use crate::types::{NodeId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Stabilizer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// How long pins are held (milliseconds)
    pub settle_ms: u64,
}

impl StabilizerConfig {
    /// Set settle window
    #[inline]
    #[must_use]
    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Settle window
    #[inline]
    #[must_use]
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self { settle_ms: 1_500 }
    }
}

/// Holds the pin set of the latest structural merge
#[derive(Debug, Clone, Default)]
pub struct PositionStabilizer {
    config: StabilizerConfig,
    pinned: Vec<(NodeId, Vec3)>,
    generation: u64,
}

impl PositionStabilizer {
    /// Create stabilizer
    #[inline]
    #[must_use]
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            pinned: Vec::new(),
            generation: 0,
        }
    }

    /// Settle window
    #[inline]
    #[must_use]
    pub fn settle_window(&self) -> Duration {
        self.config.settle_window()
    }

    /// Ids currently held by this stabilizer
    pub fn pinned(&self) -> impl Iterator<Item = &NodeId> {
        self.pinned.iter().map(|(id, _)| id)
    }

    /// Generation of the outstanding pin set, if any
    #[must_use]
    pub fn active_generation(&self) -> Option<u64> {
        (!self.pinned.is_empty()).then_some(self.generation)
    }

    /// Pin pre-existing nodes after a structural merge
    ///
    /// Returns the generation to release after the settle window, or `None`
    /// when the merge was not structural.
    pub fn stabilize(&mut self, mirror: &mut GraphMirror, outcome: &MergeOutcome) -> Option<u64> {
        if !outcome.structural_change {
            return None;
        }
        self.release(mirror);

        let added: HashSet<&NodeId> = outcome.added.iter().collect();
        for node in mirror.nodes.values_mut() {
            if added.contains(&node.id) || node.spatial.is_pinned() {
                continue;
            }
            if let Some(position) = node.spatial.position {
                node.spatial.pin = Some(position);
                self.pinned.push((node.id.clone(), position));
            }
        }

        self.generation += 1;
        tracing::debug!(
            generation = self.generation,
            pinned = self.pinned.len(),
            "positions frozen"
        );
        Some(self.generation)
    }

    /// Release the pin set of `generation` if it is still the active one
    pub fn release_generation(&mut self, mirror: &mut GraphMirror, generation: u64) -> usize {
        if generation != self.generation {
            return 0;
        }
        self.release(mirror)
    }

    /// Release every pin this stabilizer applied
    ///
    /// Pins moved by someone else since they were applied are left alone.
    pub fn release(&mut self, mirror: &mut GraphMirror) -> usize {
        let mut released = 0;
        for (id, position) in self.pinned.drain(..) {
            if let Some(node) = mirror.node_mut(id.as_str()) {
                if node.spatial.pin == Some(position) {
                    node.spatial.pin = None;
                    released += 1;
                }
            }
        }
        released
    }
}
