//! Pre-computed Dijkstra over the startup topology.
//!
//! The full adjacency comes from the topology file, every edge costs 1 and
//! is bidirectional, and the shortest-path tree is computed exactly once at
//! construction. Nothing here reacts to the network afterwards — liveness
//! is the link-state variant's concern.

use std::collections::{BTreeMap, BTreeSet};

use ruta_wire::{NodeId, Packet, PacketKind};

use crate::{Decision, Route};

pub struct DijkstraState {
    node: NodeId,
    topology: BTreeMap<NodeId, Vec<NodeId>>,
    neighbors: BTreeMap<NodeId, u32>,
    routing_table: BTreeMap<NodeId, NodeId>,
    predecessors: BTreeMap<NodeId, NodeId>,
    distances: BTreeMap<NodeId, u32>,
}

impl DijkstraState {
    /// Build the state and run the one-and-only shortest-path computation.
    pub fn new(node: NodeId, topology: BTreeMap<NodeId, Vec<NodeId>>) -> Self {
        let mut state = Self {
            node,
            topology,
            neighbors: BTreeMap::new(),
            routing_table: BTreeMap::new(),
            predecessors: BTreeMap::new(),
            distances: BTreeMap::new(),
        };
        state.compute();
        state
    }

    pub fn update_neighbor(&mut self, id: NodeId, cost: u32) {
        self.neighbors.insert(id, cost);
    }

    pub fn neighbors(&self) -> &BTreeMap<NodeId, u32> {
        &self.neighbors
    }

    pub fn routing_table(&self) -> &BTreeMap<NodeId, NodeId> {
        &self.routing_table
    }

    pub fn topology(&self) -> &BTreeMap<NodeId, Vec<NodeId>> {
        &self.topology
    }

    /// No protocol work: control packets are ignored and data packets are
    /// answered straight from the precomputed table.
    pub fn process_packet(&mut self, packet: &mut Packet) -> Decision {
        if matches!(packet.kind, PacketKind::Hello | PacketKind::Info | PacketKind::Lsa) {
            return Decision::ConsumeLocal;
        }
        match packet.to.node().and_then(|dest| self.routing_table.get(dest)) {
            Some(next) => Decision::NextHop(next.clone()),
            None => Decision::NoRoute,
        }
    }

    pub fn get_next_hop(&self, destination: &NodeId) -> Option<Route> {
        self.routing_table
            .get(destination)
            .cloned()
            .map(Route::Neighbor)
    }

    /// The node sequence from self to `destination` along the shortest-path
    /// tree, for diagnostics. Empty when unreachable.
    pub fn get_full_path(&self, destination: &NodeId) -> Vec<NodeId> {
        if *destination == self.node {
            return vec![self.node.clone()];
        }
        if !self.distances.contains_key(destination) {
            return Vec::new();
        }

        let mut path = vec![destination.clone()];
        let mut cursor = destination;
        while let Some(prev) = self.predecessors.get(cursor) {
            path.push(prev.clone());
            if *prev == self.node {
                path.reverse();
                return path;
            }
            cursor = prev;
        }
        Vec::new()
    }

    /// Single-source shortest paths from `self.node`. Candidate selection
    /// and neighbor relaxation both iterate in node-id order, so equal-cost
    /// ties always resolve the same way on every router.
    fn compute(&mut self) {
        let mut nodes: BTreeSet<NodeId> = self.topology.keys().cloned().collect();
        for neighbors in self.topology.values() {
            nodes.extend(neighbors.iter().cloned());
        }

        let mut adjacency: BTreeMap<&NodeId, BTreeSet<&NodeId>> = BTreeMap::new();
        for (node, neighbors) in &self.topology {
            for neighbor in neighbors {
                adjacency.entry(node).or_default().insert(neighbor);
                adjacency.entry(neighbor).or_default().insert(node);
            }
        }

        let mut dist: BTreeMap<NodeId, u32> = BTreeMap::new();
        let mut prev: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        dist.insert(self.node.clone(), 0);

        let mut unvisited = nodes;
        while !unvisited.is_empty() {
            let current = match unvisited
                .iter()
                .filter_map(|n| dist.get(n).map(|d| (*d, n.clone())))
                .min()
            {
                Some((_, node)) => node,
                None => break, // everything left is unreachable
            };
            unvisited.remove(&current);

            let Some(current_dist) = dist.get(&current).copied() else {
                continue;
            };
            let Some(neighbors) = adjacency.get(&current) else {
                continue;
            };
            for &neighbor in neighbors {
                if !unvisited.contains(neighbor) {
                    continue;
                }
                let alt = current_dist + 1;
                if dist.get(neighbor).map_or(true, |&d| alt < d) {
                    dist.insert(neighbor.clone(), alt);
                    prev.insert(neighbor.clone(), current.clone());
                }
            }
        }

        let mut table = BTreeMap::new();
        for destination in dist.keys() {
            if *destination == self.node {
                continue;
            }
            if let Some(first) = first_hop(&self.node, destination, &prev) {
                table.insert(destination.clone(), first);
            }
        }

        self.routing_table = table;
        self.predecessors = prev;
        self.distances = dist;

        log::info!(
            "dijkstra({}): computed {} routes over {} nodes",
            self.node,
            self.routing_table.len(),
            self.distances.len()
        );
    }
}

/// Walk the predecessor chain from `destination` back to `source` and
/// return the first hop out of `source`.
fn first_hop(
    source: &NodeId,
    destination: &NodeId,
    prev: &BTreeMap<NodeId, NodeId>,
) -> Option<NodeId> {
    let mut cursor = destination.clone();
    loop {
        let parent = prev.get(&cursor)?;
        if parent == source {
            return Some(cursor);
        }
        cursor = parent.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(edges: &[(&str, &[&str])]) -> BTreeMap<NodeId, Vec<NodeId>> {
        edges
            .iter()
            .map(|(node, neighbors)| {
                (
                    NodeId::from(*node),
                    neighbors.iter().map(|n| NodeId::from(*n)).collect(),
                )
            })
            .collect()
    }

    fn chain_abc() -> BTreeMap<NodeId, Vec<NodeId>> {
        topology(&[("a", &["b"]), ("b", &["a", "c"]), ("c", &["b"])])
    }

    #[test]
    fn linear_chain_routes_through_the_middle() {
        let a = DijkstraState::new(NodeId::from("a"), chain_abc());
        assert_eq!(a.routing_table().get(&NodeId::from("c")), Some(&NodeId::from("b")));
        assert_eq!(a.routing_table().get(&NodeId::from("b")), Some(&NodeId::from("b")));

        let c = DijkstraState::new(NodeId::from("c"), chain_abc());
        assert_eq!(c.routing_table().get(&NodeId::from("a")), Some(&NodeId::from("b")));
    }

    #[test]
    fn unreachable_destination_is_no_route() {
        let state = DijkstraState::new(
            NodeId::from("a"),
            topology(&[("a", &["b"]), ("b", &["a"]), ("x", &["y"]), ("y", &["x"])]),
        );
        assert_eq!(state.get_next_hop(&NodeId::from("y")), None);

        let mut packet = Packet::new(
            ruta_wire::Proto::Dijkstra,
            PacketKind::Message,
            NodeId::from("a"),
            NodeId::from("y"),
        );
        let mut state = state;
        assert_eq!(state.process_packet(&mut packet), Decision::NoRoute);
    }

    #[test]
    fn equal_cost_tie_breaks_on_node_id_order() {
        // a reaches d both via b and via c at cost 2; b wins by name.
        let square = topology(&[
            ("a", &["b", "c"]),
            ("b", &["a", "d"]),
            ("c", &["a", "d"]),
            ("d", &["b", "c"]),
        ]);
        let state = DijkstraState::new(NodeId::from("a"), square.clone());
        assert_eq!(state.routing_table().get(&NodeId::from("d")), Some(&NodeId::from("b")));

        // Same inputs, same table — on any router.
        let again = DijkstraState::new(NodeId::from("a"), square);
        assert_eq!(state.routing_table(), again.routing_table());
    }

    #[test]
    fn control_packets_are_ignored() {
        let mut state = DijkstraState::new(NodeId::from("a"), chain_abc());
        let mut info = Packet::new(
            ruta_wire::Proto::Dijkstra,
            PacketKind::Info,
            NodeId::from("b"),
            ruta_wire::Destination::Broadcast,
        );
        assert_eq!(state.process_packet(&mut info), Decision::ConsumeLocal);
    }

    #[test]
    fn full_path_walks_the_tree() {
        let state = DijkstraState::new(NodeId::from("a"), chain_abc());
        assert_eq!(
            state.get_full_path(&NodeId::from("c")),
            vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]
        );
        assert_eq!(state.get_full_path(&NodeId::from("zz")), Vec::<NodeId>::new());
    }
}
