//! Dependency propagation force
//!
//! Custom layout force run once per simulation tick. Each agent pulls the
//! work it is assigned (hop 1) and the chain of issues that work blocks
//! (hops 2..=`max_hops`) toward itself, weaker with every hop.
//!
//! The force only adds to velocities. Pinned and unpositioned nodes are
//! never touched.

use crate::mirror::GraphMirror;
use crate::types::{LinkKind, NodeId};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

/// Force tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    /// Base pull strength
    pub strength: f64,
    /// Strength multiplier per extra hop
    pub decay: f64,
    /// Deepest hop pulled
    pub max_hops: u32,
    /// Distance per hop below which no pull is applied
    pub rest_distance: f64,
}

impl ForceConfig {
    /// Set base strength
    #[inline]
    #[must_use]
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    /// Set per-hop decay
    #[inline]
    #[must_use]
    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    /// Set hop limit
    #[inline]
    #[must_use]
    pub fn with_max_hops(mut self, hops: u32) -> Self {
        self.max_hops = hops;
        self
    }

    /// Set rest distance
    #[inline]
    #[must_use]
    pub fn with_rest_distance(mut self, distance: f64) -> Self {
        self.rest_distance = distance;
        self
    }
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            strength: 0.05,
            decay: 0.5,
            max_hops: 3,
            rest_distance: 40.0,
        }
    }
}

/// One agent-to-work attraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tether {
    pub agent: NodeId,
    pub node: NodeId,
    /// 1 for directly assigned work
    pub hop: u32,
}

/// Agent-centred attraction force
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyPropagationForce {
    config: ForceConfig,
}

impl DependencyPropagationForce {
    /// Create force
    #[inline]
    #[must_use]
    pub fn new(config: ForceConfig) -> Self {
        Self { config }
    }

    /// Force configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ForceConfig {
        &self.config
    }

    /// Every attraction the current graph implies
    #[must_use]
    pub fn tethers(&self, mirror: &GraphMirror) -> Vec<Tether> {
        self.reach(mirror)
            .into_iter()
            .filter_map(|(agent, node, hop)| {
                let (agent, _) = mirror.nodes.get_index(agent)?;
                let (node, _) = mirror.nodes.get_index(node)?;
                Some(Tether {
                    agent: agent.clone(),
                    node: node.clone(),
                    hop,
                })
            })
            .collect()
    }

    /// Apply one tick of the force; returns how many pulls were applied
    pub fn apply(&self, mirror: &mut GraphMirror, alpha: f64) -> usize {
        let mut pulls = 0;
        for (agent, index, hop) in self.reach(mirror) {
            let Some(anchor) = mirror
                .nodes
                .get_index(agent)
                .and_then(|(_, node)| node.position())
            else {
                continue;
            };
            let Some((_, node)) = mirror.nodes.get_index_mut(index) else {
                continue;
            };
            if node.spatial.is_pinned() {
                continue;
            }
            let Some(position) = node.spatial.position else {
                continue;
            };

            let delta = anchor - position;
            let distance = delta.length();
            let rest = self.config.rest_distance * f64::from(hop);
            if distance <= rest || distance == 0.0 {
                continue;
            }
            let exponent = i32::try_from(hop.saturating_sub(1)).unwrap_or(i32::MAX);
            let k = self.config.strength * self.config.decay.powi(exponent) * alpha;
            node.spatial.velocity += delta * ((distance - rest) / distance * k);
            pulls += 1;
        }
        pulls
    }

    /// `(agent index, node index, hop)` for every reachable node
    fn reach(&self, mirror: &GraphMirror) -> Vec<(usize, usize, u32)> {
        let mut blocks = DiGraphMap::<usize, ()>::new();
        let mut assigned: HashMap<usize, Vec<usize>> = HashMap::new();
        for key in mirror.links.keys() {
            let (Some(source), Some(target)) = (
                mirror.nodes.get_index_of(&key.source),
                mirror.nodes.get_index_of(&key.target),
            ) else {
                continue;
            };
            match key.kind {
                LinkKind::Blocks => {
                    blocks.add_edge(source, target, ());
                }
                LinkKind::AssignedTo => assigned.entry(source).or_default().push(target),
                _ => {}
            }
        }

        let mut reached = Vec::new();
        for (agent_index, agent) in mirror.nodes.values().enumerate() {
            if !agent.attrs.issue_type.is_agent() {
                continue;
            }

            let by_assignee = mirror
                .nodes
                .values()
                .enumerate()
                .filter(|(index, node)| {
                    *index != agent_index
                        && node.attrs.assignee.as_deref().is_some_and(|assignee| {
                            assignee == agent.id.as_str() || assignee == agent.attrs.title
                        })
                })
                .map(|(index, _)| index);
            let direct = assigned
                .get(&agent_index)
                .into_iter()
                .flatten()
                .copied()
                .chain(by_assignee);

            let mut hops: HashMap<usize, u32> = HashMap::from([(agent_index, 0)]);
            let mut queue = VecDeque::new();
            for index in direct {
                if let Entry::Vacant(slot) = hops.entry(index) {
                    slot.insert(1);
                    queue.push_back(index);
                }
            }

            while let Some(index) = queue.pop_front() {
                let hop = hops[&index];
                if hop >= self.config.max_hops || !blocks.contains_node(index) {
                    continue;
                }
                for next in blocks.neighbors_directed(index, Direction::Outgoing) {
                    if let Entry::Vacant(slot) = hops.entry(next) {
                        slot.insert(hop + 1);
                        queue.push_back(next);
                    }
                }
            }

            hops.remove(&agent_index);
            let mut found: Vec<_> = hops.into_iter().collect();
            found.sort_unstable();
            reached.extend(found.into_iter().map(|(index, hop)| (agent_index, index, hop)));
        }
        reached
    }
}
