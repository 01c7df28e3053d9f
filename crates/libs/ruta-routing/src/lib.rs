//! # ruta-routing
//!
//! The three routing algorithms a ruta router can run, behind one small
//! dispatch surface. The router engine feeds every inbound packet to
//! [`Algorithm::process_packet`] and acts on the returned [`Decision`];
//! origination asks [`Algorithm::get_next_hop`]. Algorithms never perform
//! I/O themselves — the link-state variant exposes `should_send_*` /
//! `create_*_packet` pairs that the engine polls on its periodic tick.
//!
//! All time-dependent state takes an explicit [`std::time::Instant`] so the
//! protocol machinery is testable without sleeping.

pub mod dijkstra;
pub mod flooding;
pub mod lsr;
pub mod seen;

use std::collections::BTreeMap;
use std::time::Instant;

use ruta_wire::{NodeId, Packet, Proto};

pub use dijkstra::DijkstraState;
pub use flooding::FloodingState;
pub use lsr::LsrState;
pub use seen::{SeenCache, SEEN_CAPACITY};

/// What the engine should do with an inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The algorithm handled (or rejected) the packet; do not retransmit.
    ConsumeLocal,
    /// Retransmit to all peers except the sender.
    Flood,
    /// Same fan-out as `Flood`, marking an LSA reflood.
    FloodLsa,
    /// Unicast to this direct neighbor.
    NextHop(NodeId),
    /// No usable route; drop with a log line.
    NoRoute,
}

/// Answer to a next-hop lookup at origination time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Send to every peer (flooding has no per-destination state).
    Flood,
    /// Hand off to this direct neighbor.
    Neighbor(NodeId),
}

/// A routing algorithm variant with its state inline.
pub enum Algorithm {
    Flooding(FloodingState),
    Dijkstra(DijkstraState),
    Lsr(LsrState),
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flooding(_) => "flooding",
            Self::Dijkstra(_) => "dijkstra",
            Self::Lsr(_) => "lsr",
        }
    }

    pub fn proto(&self) -> Proto {
        match self {
            Self::Flooding(_) => Proto::Flooding,
            Self::Dijkstra(_) => Proto::Dijkstra,
            Self::Lsr(_) => Proto::Lsr,
        }
    }

    /// Learn or refresh a direct neighbor. Idempotent.
    pub fn update_neighbor(&mut self, id: NodeId, cost: u32, now: Instant) {
        match self {
            Self::Flooding(state) => state.update_neighbor(id, cost),
            Self::Dijkstra(state) => state.update_neighbor(id, cost),
            Self::Lsr(state) => state.update_neighbor(id, cost, now),
        }
    }

    /// Run the algorithm over one inbound packet. `from` is the neighbor
    /// the transport attributed the packet to, when it could.
    pub fn process_packet(
        &mut self,
        packet: &mut Packet,
        from: Option<&NodeId>,
        now: Instant,
    ) -> Decision {
        match self {
            Self::Flooding(state) => state.process_packet(packet),
            Self::Dijkstra(state) => state.process_packet(packet),
            Self::Lsr(state) => state.process_packet(packet, from, now),
        }
    }

    pub fn get_next_hop(&self, destination: &NodeId) -> Option<Route> {
        match self {
            Self::Flooding(state) => state.get_next_hop(destination),
            Self::Dijkstra(state) => state.get_next_hop(destination),
            Self::Lsr(state) => state.get_next_hop(destination),
        }
    }

    /// Current `destination -> next hop` table. Empty for flooding, which
    /// keeps no per-destination state.
    pub fn routing_table(&self) -> BTreeMap<NodeId, NodeId> {
        match self {
            Self::Flooding(_) => BTreeMap::new(),
            Self::Dijkstra(state) => state.routing_table().clone(),
            Self::Lsr(state) => state.routing_table().clone(),
        }
    }

    /// Configured direct neighbors and their costs.
    pub fn neighbors(&self) -> BTreeMap<NodeId, u32> {
        match self {
            Self::Flooding(state) => state.neighbors().clone(),
            Self::Dijkstra(state) => state.neighbors().clone(),
            Self::Lsr(state) => state.neighbor_costs(),
        }
    }

    pub fn as_lsr(&self) -> Option<&LsrState> {
        match self {
            Self::Lsr(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_lsr_mut(&mut self) -> Option<&mut LsrState> {
        match self {
            Self::Lsr(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_dijkstra(&self) -> Option<&DijkstraState> {
        match self {
            Self::Dijkstra(state) => Some(state),
            _ => None,
        }
    }
}
