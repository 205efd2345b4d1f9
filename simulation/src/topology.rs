//! Radio topologies for the COPE simulation
//!
//! A [`Topology`] lists nodes, which pairs are within radio range, and a
//! static next-hop table computed by breadth-first search over the range
//! graph. Builders cover the canonical coding layouts:
//! - Alice-Bob: two end nodes out of range of each other, one relay between
//! - Cross: four end nodes around a relay, each overhearing its two
//!   adjacent ends but not the opposite one
//! - Chain: a line of nodes, each in range of its direct neighbors only

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use cope_core::Channel;

use crate::types::{NodeId, NodeSpec};

/// Nodes, radio range and static routes
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeSpec>,
    range: BTreeMap<NodeId, BTreeSet<NodeId>>,
    routes: BTreeMap<(NodeId, NodeId), NodeId>,
}

impl Topology {
    /// Nodes `A..` on one channel, no links yet
    pub fn new(count: usize, channel: Channel) -> Self {
        let nodes = (0..count)
            .filter_map(NodeId::from_index)
            .map(|id| NodeSpec { id, channel })
            .collect();
        Self {
            nodes,
            range: BTreeMap::new(),
            routes: BTreeMap::new(),
        }
    }

    /// Put `a` and `b` within radio range of each other
    pub fn connect(&mut self, a: char, b: char) -> &mut Self {
        if let (Some(a), Some(b)) = (NodeId::new(a), NodeId::new(b))
            && a != b
        {
            self.range.entry(a).or_default().insert(b);
            self.range.entry(b).or_default().insert(a);
        }
        self
    }

    /// Recompute shortest-path next hops between every pair of nodes
    pub fn compute_routes(&mut self) {
        self.routes.clear();
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for &source in &ids {
            // BFS from source, remembering the first hop taken to each node
            let mut first_hop: BTreeMap<NodeId, NodeId> = BTreeMap::new();
            let mut frontier = VecDeque::from([source]);
            let mut seen = BTreeSet::from([source]);
            while let Some(at) = frontier.pop_front() {
                for &next in self.in_range(at) {
                    if !seen.insert(next) {
                        continue;
                    }
                    let hop = if at == source {
                        next
                    } else {
                        first_hop.get(&at).copied().unwrap_or(next)
                    };
                    first_hop.insert(next, hop);
                    frontier.push_back(next);
                }
            }
            for (dest, hop) in first_hop {
                self.routes.insert((source, dest), hop);
            }
        }
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    pub fn spec(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes that hear `id`'s transmissions
    pub fn in_range(&self, id: NodeId) -> impl Iterator<Item = &NodeId> {
        self.range.get(&id).into_iter().flatten()
    }

    pub fn are_in_range(&self, a: NodeId, b: NodeId) -> bool {
        self.range.get(&a).is_some_and(|r| r.contains(&b))
    }

    /// Next hop from `from` toward `to`
    pub fn next_hop(&self, from: NodeId, to: NodeId) -> Option<NodeId> {
        self.routes.get(&(from, to)).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.range.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Radio Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n\n", self.edge_count()));
        for node in &self.nodes {
            let heard: Vec<String> = self.in_range(node.id).map(|n| n.to_string()).collect();
            output.push_str(&format!(
                "  {} (ch {}) hears [{}]\n",
                node.id,
                node.channel,
                heard.join(", ")
            ));
        }
        output
    }
}

/// Builders for the canonical layouts
pub struct TopologyBuilder {
    channel: Channel,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self { channel: 1 }
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// A - B - C, with B relaying between the ends
    pub fn alice_bob(self) -> Topology {
        let mut topo = Topology::new(3, self.channel);
        topo.connect('A', 'B').connect('B', 'C');
        topo.compute_routes();
        topo
    }

    /// Relay E in the middle; A, B, C, D around it, A opposite C and B
    /// opposite D
    pub fn cross(self) -> Topology {
        let mut topo = Topology::new(5, self.channel);
        for end in ['A', 'B', 'C', 'D'] {
            topo.connect(end, 'E');
        }
        topo.connect('A', 'B')
            .connect('B', 'C')
            .connect('C', 'D')
            .connect('D', 'A');
        topo.compute_routes();
        // Adjacent ends overhear each other but all traffic goes via the relay
        topo.force_via('E');
        topo
    }

    /// `count` nodes in a line
    pub fn chain(self, count: usize) -> Topology {
        let mut topo = Topology::new(count.clamp(2, 26), self.channel);
        let ids = topo.node_ids();
        for pair in ids.windows(2) {
            topo.connect(pair[0].0, pair[1].0);
        }
        topo.compute_routes();
        topo
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// Route every pair of non-relay nodes through `relay`
    fn force_via(&mut self, relay: char) {
        let Some(relay) = NodeId::new(relay) else {
            return;
        };
        let ids = self.node_ids();
        for &a in &ids {
            for &b in &ids {
                if a != b && a != relay && b != relay {
                    self.routes.insert((a, b), relay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alice_bob_routes_through_relay() {
        let topo = TopologyBuilder::new().alice_bob();
        assert_eq!(topo.node_count(), 3);
        assert!(!topo.are_in_range(NodeId('A'), NodeId('C')));
        assert_eq!(topo.next_hop(NodeId('A'), NodeId('C')), Some(NodeId('B')));
        assert_eq!(topo.next_hop(NodeId('C'), NodeId('A')), Some(NodeId('B')));
        assert_eq!(topo.next_hop(NodeId('A'), NodeId('B')), Some(NodeId('B')));
    }

    #[test]
    fn test_chain_routes_hop_by_hop() {
        let topo = TopologyBuilder::new().chain(5);
        assert_eq!(topo.edge_count(), 4);
        assert_eq!(topo.next_hop(NodeId('A'), NodeId('E')), Some(NodeId('B')));
        assert_eq!(topo.next_hop(NodeId('E'), NodeId('A')), Some(NodeId('D')));
        assert_eq!(topo.next_hop(NodeId('C'), NodeId('A')), Some(NodeId('B')));
    }

    #[test]
    fn test_cross_overhearing() {
        let topo = TopologyBuilder::new().cross();
        assert!(topo.are_in_range(NodeId('A'), NodeId('B')));
        assert!(topo.are_in_range(NodeId('A'), NodeId('D')));
        assert!(!topo.are_in_range(NodeId('A'), NodeId('C')));
        assert_eq!(topo.next_hop(NodeId('A'), NodeId('C')), Some(NodeId('E')));
        assert_eq!(topo.next_hop(NodeId('A'), NodeId('B')), Some(NodeId('E')));
    }

    #[test]
    fn test_visualize_lists_every_node() {
        let topo = TopologyBuilder::new().alice_bob();
        let text = topo.visualize();
        assert!(text.contains("A (ch 1) hears [B]"));
        assert!(text.contains("B (ch 1) hears [A, C]"));
    }
}
