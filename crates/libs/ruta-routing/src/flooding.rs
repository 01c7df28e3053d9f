//! Controlled flooding.
//!
//! No routing table at all: every packet goes to every peer except the one
//! it came from. Loops are contained by three fences — the per-algorithm
//! msg-id set here, the engine's own receive-side cache, and the rolling
//! `path` window in the packet headers.

use std::collections::BTreeMap;

use ruta_wire::{NodeId, Packet, PacketKind};

use crate::seen::SeenCache;
use crate::{Decision, Route};

pub struct FloodingState {
    node: NodeId,
    neighbors: BTreeMap<NodeId, u32>,
    seen: SeenCache<String>,
}

impl FloodingState {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            neighbors: BTreeMap::new(),
            seen: SeenCache::default(),
        }
    }

    pub fn update_neighbor(&mut self, id: NodeId, cost: u32) {
        self.neighbors.insert(id, cost);
    }

    pub fn neighbors(&self) -> &BTreeMap<NodeId, u32> {
        &self.neighbors
    }

    pub fn process_packet(&mut self, packet: &mut Packet) -> Decision {
        // HELLO asserts presence only; it is never retransmitted.
        if packet.kind == PacketKind::Hello {
            return Decision::ConsumeLocal;
        }

        let msg_id = packet.ensure_msg_id().to_owned();
        if !self.seen.insert(msg_id) {
            log::debug!("flooding({}): duplicate {}, dropping", self.node, packet);
            return Decision::ConsumeLocal;
        }

        if packet.path().contains(&self.node) {
            log::debug!("flooding({}): cycle via path header, dropping {}", self.node, packet);
            return Decision::ConsumeLocal;
        }
        packet.record_hop(self.node.clone());

        Decision::Flood
    }

    pub fn get_next_hop(&self, _destination: &NodeId) -> Option<Route> {
        Some(Route::Flood)
    }
}
