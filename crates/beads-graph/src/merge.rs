//! Snapshot merge
//!
//! Folds an authoritative [`Snapshot`] into a [`GraphMirror`] so that the
//! mirror's id and link sets equal the snapshot's while surviving nodes keep
//! their layout state:
//! - Existing ids: attributes copied in place; position, velocity, pin and
//!   presentation handle untouched
//! - New ids: seeded near a positioned neighbour, else left unpositioned
//! - Missing ids: removed
//! - Links: deduplicated by `(source, target, kind)`

use crate::mirror::GraphMirror;
use crate::snapshot::{Snapshot, SnapshotNode};
use crate::types::{GraphLink, GraphNode, LinkKey, NodeId, Vec3};
use indexmap::map::Entry;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Merge tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Max per-axis offset of a new node from the neighbour it is seeded at
    pub seed_radius: f64,
}

impl MergeConfig {
    /// Set seed radius
    #[inline]
    #[must_use]
    pub fn with_seed_radius(mut self, radius: f64) -> Self {
        self.seed_radius = radius.abs();
        self
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { seed_radius: 30.0 }
    }
}

/// Result of one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Nodes added or removed, or the link set changed
    pub structural_change: bool,
    /// New ids in snapshot order
    pub added: Vec<NodeId>,
    /// Ids no longer present
    pub removed: Vec<NodeId>,
    /// Surviving ids whose attributes changed
    pub updated: Vec<NodeId>,
    /// Link set differs from before
    pub links_changed: bool,
}

impl MergeOutcome {
    /// Whether the merge changed nothing observable
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.structural_change && self.updated.is_empty()
    }
}

/// Snapshot merger
#[derive(Debug, Clone)]
pub struct GraphMerger {
    config: MergeConfig,
    rng: StdRng,
}

impl Default for GraphMerger {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

impl GraphMerger {
    /// Create merger
    #[must_use]
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create merger with deterministic seed placement
    #[must_use]
    pub fn with_seed(config: MergeConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Merge configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge `snapshot` into `mirror`
    pub fn merge(&mut self, mirror: &mut GraphMirror, snapshot: Snapshot) -> MergeOutcome {
        let Snapshot {
            nodes,
            edges,
            stats,
        } = snapshot;

        let mut incoming: IndexMap<NodeId, SnapshotNode> = IndexMap::with_capacity(nodes.len());
        let mut duplicates = 0usize;
        for node in nodes {
            match incoming.entry(node.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(node);
                }
                Entry::Occupied(_) => duplicates += 1,
            }
        }

        let mut links: IndexMap<LinkKey, GraphLink> = IndexMap::with_capacity(edges.len());
        let mut dangling = 0usize;
        for edge in edges {
            if !incoming.contains_key(&edge.source) || !incoming.contains_key(&edge.target) {
                dangling += 1;
                continue;
            }
            let key = LinkKey::new(edge.source, edge.target, edge.kind);
            if links.contains_key(&key) {
                continue;
            }
            let presentation = mirror.links.get(&key).and_then(|link| link.presentation);
            links.insert(key.clone(), GraphLink { key, presentation });
        }
        let links_changed = links.len() != mirror.links.len()
            || links.keys().any(|key| !mirror.links.contains_key(key));

        let removed: Vec<NodeId> = mirror
            .nodes
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        mirror.nodes.retain(|id, _| incoming.contains_key(id));

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (id, node) in incoming {
            let attrs = node.attributes();
            if let Some(existing) = mirror.nodes.get_mut(&id) {
                if existing.attrs != attrs {
                    existing.attrs = attrs;
                    updated.push(id);
                }
            } else {
                mirror
                    .nodes
                    .insert(id.clone(), GraphNode::new(id.clone(), attrs));
                added.push(id);
            }
        }

        mirror.links = links;
        mirror.stats = stats;

        for id in &added {
            self.seed(mirror, id);
        }
        mirror.recompute_flags();

        let structural_change = !added.is_empty() || !removed.is_empty() || links_changed;
        tracing::debug!(
            added = added.len(),
            removed = removed.len(),
            updated = updated.len(),
            links_changed,
            duplicates,
            dangling,
            "snapshot merged"
        );

        MergeOutcome {
            structural_change,
            added,
            removed,
            updated,
            links_changed,
        }
    }

    /// Place a new node near the first positioned neighbour
    fn seed(&mut self, mirror: &mut GraphMirror, id: &NodeId) {
        let anchor = mirror
            .links
            .keys()
            .filter_map(|key| {
                if key.source == *id {
                    Some(&key.target)
                } else if key.target == *id {
                    Some(&key.source)
                } else {
                    None
                }
            })
            .find_map(|other| mirror.nodes.get(other).and_then(GraphNode::position));

        let Some(anchor) = anchor else {
            return;
        };
        let radius = self.config.seed_radius.abs();
        if !radius.is_finite() {
            if let Some(node) = mirror.node_mut(id.as_str()) {
                node.spatial.position = Some(anchor);
            }
            return;
        }
        let offset = Vec3::new(
            self.rng.gen_range(-radius..=radius),
            self.rng.gen_range(-radius..=radius),
            self.rng.gen_range(-radius..=radius),
        );
        if let Some(node) = mirror.node_mut(id.as_str()) {
            node.spatial.position = Some(anchor + offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotEdge;
    use crate::types::{LinkKind, PresentationHandle, Status};

    fn snapshot(ids: &[&str], edges: &[(&str, &str, LinkKind)]) -> Snapshot {
        Snapshot::default()
            .with_nodes(ids.iter().map(|id| SnapshotNode::new(*id, *id)))
            .with_edges(
                edges
                    .iter()
                    .map(|(s, t, kind)| SnapshotEdge::new(*s, *t, kind.clone())),
            )
    }

    #[test]
    fn first_merge_adds_everything() {
        let mut mirror = GraphMirror::new();
        let mut merger = GraphMerger::with_seed(MergeConfig::default(), 7);
        let outcome = merger.merge(
            &mut mirror,
            snapshot(&["a", "b"], &[("a", "b", LinkKind::Blocks)]),
        );

        assert!(outcome.structural_change);
        assert_eq!(outcome.added, vec![NodeId::from("a"), NodeId::from("b")]);
        assert!(outcome.links_changed);
        assert_eq!(mirror.node_count(), 2);
        assert!(mirror.node("b").unwrap().flags.blocked);
        // Nobody is positioned yet, so nothing is seeded
        assert_eq!(mirror.node("b").unwrap().position(), None);
    }

    #[test]
    fn attribute_change_is_not_structural() {
        let mut mirror = GraphMirror::new();
        let mut merger = GraphMerger::default();
        merger.merge(&mut mirror, snapshot(&["a"], &[]));

        let changed = Snapshot::default()
            .with_nodes([SnapshotNode::new("a", "renamed").with_status(Status::Closed)]);
        let outcome = merger.merge(&mut mirror, changed);

        assert!(!outcome.structural_change);
        assert_eq!(outcome.updated, vec![NodeId::from("a")]);
        assert_eq!(mirror.node("a").unwrap().attrs.title, "renamed");
    }

    #[test]
    fn new_node_seeded_near_positioned_neighbour() {
        let mut mirror = GraphMirror::new();
        let mut merger = GraphMerger::with_seed(MergeConfig::default().with_seed_radius(10.0), 1);
        merger.merge(&mut mirror, snapshot(&["a"], &[]));
        mirror.set_position("a", Vec3::new(100.0, 100.0, 100.0));

        merger.merge(
            &mut mirror,
            snapshot(&["a", "b"], &[("a", "b", LinkKind::ParentChild)]),
        );

        let b = mirror.node("b").unwrap().position().unwrap();
        for axis in [b.x, b.y, b.z] {
            assert!((90.0..=110.0).contains(&axis), "{axis}");
        }
    }

    #[test]
    fn non_finite_seed_radius_places_on_anchor() {
        for radius in [f64::INFINITY, f64::NAN] {
            let mut mirror = GraphMirror::new();
            let mut merger =
                GraphMerger::with_seed(MergeConfig::default().with_seed_radius(radius), 3);
            merger.merge(&mut mirror, snapshot(&["a"], &[]));
            mirror.set_position("a", Vec3::new(5.0, 6.0, 7.0));

            merger.merge(
                &mut mirror,
                snapshot(&["a", "b"], &[("a", "b", LinkKind::Related)]),
            );

            assert_eq!(
                mirror.node("b").unwrap().position(),
                Some(Vec3::new(5.0, 6.0, 7.0))
            );
        }
    }

    #[test]
    fn removed_ids_and_dangling_links_are_dropped() {
        let mut mirror = GraphMirror::new();
        let mut merger = GraphMerger::default();
        merger.merge(
            &mut mirror,
            snapshot(&["a", "b"], &[("a", "b", LinkKind::Blocks)]),
        );

        let outcome = merger.merge(
            &mut mirror,
            snapshot(&["a"], &[("a", "b", LinkKind::Blocks)]),
        );
        assert_eq!(outcome.removed, vec![NodeId::from("b")]);
        assert!(outcome.links_changed);
        assert_eq!(mirror.link_count(), 0);
    }

    #[test]
    fn link_presentation_survives_merge() {
        let mut mirror = GraphMirror::new();
        let mut merger = GraphMerger::default();
        let snap = snapshot(&["a", "b"], &[("a", "b", LinkKind::Related)]);
        merger.merge(&mut mirror, snap.clone());
        let key = LinkKey::new("a", "b", LinkKind::Related);
        mirror.attach_link_presentation(&key, PresentationHandle(9));

        let outcome = merger.merge(&mut mirror, snap);
        assert!(outcome.is_noop());
        assert_eq!(
            mirror.link(&key).unwrap().presentation,
            Some(PresentationHandle(9))
        );
    }

    #[test]
    fn duplicate_node_keeps_first() {
        let mut mirror = GraphMirror::new();
        let mut merger = GraphMerger::default();
        let snap = Snapshot::default().with_nodes([
            SnapshotNode::new("a", "first"),
            SnapshotNode::new("a", "second"),
        ]);
        let outcome = merger.merge(&mut mirror, snap);
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(mirror.node("a").unwrap().attrs.title, "first");
    }
}
