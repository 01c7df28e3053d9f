//! Link-State Routing.
//!
//! A trimmed-down OSPF: periodic HELLOs keep per-neighbor liveness, LSAs
//! carry each origin's neighbor set under a monotonic sequence number into
//! an aging LSDB, and every database change reruns SPF to publish a fresh
//! `destination -> next hop` table.
//!
//! The state machine is pull-driven: the engine's periodic tick asks
//! `should_send_hello` / `should_send_lsa` and then calls the matching
//! `create_*_packet`; this module never touches a socket.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ruta_wire::{Destination, NodeId, Packet, PacketKind, Proto};

use crate::seen::SeenCache;
use crate::{Decision, Route};

pub const HELLO_INTERVAL: Duration = Duration::from_secs(5);
pub const NEIGHBOR_TIMEOUT: Duration = Duration::from_secs(20);
pub const LSA_MIN_INTERVAL: Duration = Duration::from_secs(8);
pub const LSA_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const LSA_MAX_AGE: Duration = Duration::from_secs(90);

pub const HELLO_TTL: u32 = 5;
pub const LSA_TTL: u32 = 16;

/// Liveness record for one direct neighbor.
#[derive(Debug, Clone)]
pub struct NeighborState {
    pub cost: u32,
    pub last_seen: Instant,
    pub alive: bool,
}

/// Latest accepted advertisement from one origin.
#[derive(Debug, Clone)]
pub struct LsdbEntry {
    pub seq: u64,
    pub neighbors: BTreeMap<NodeId, u32>,
    pub last_received: Instant,
}

/// LSA packet payload. Carried as a JSON string inside `payload`; decoding
/// also accepts the bare-object form.
#[derive(Debug, Serialize, Deserialize)]
struct LsaPayload {
    origin: NodeId,
    seq: u64,
    #[serde(default)]
    neighbors: BTreeMap<NodeId, u32>,
    #[serde(default)]
    ts: f64,
}

pub struct LsrState {
    node: NodeId,
    neighbor_states: BTreeMap<NodeId, NeighborState>,
    link_state_db: BTreeMap<NodeId, LsdbEntry>,
    area_routers: BTreeSet<NodeId>,
    my_lsa_seq: u64,
    last_lsa_time: Option<Instant>,
    last_hello_time: Option<Instant>,
    topology_changed: bool,
    lsa_seen: SeenCache<(NodeId, u64)>,
    routing_table: BTreeMap<NodeId, NodeId>,
}

impl LsrState {
    pub fn new(node: NodeId) -> Self {
        let mut area_routers = BTreeSet::new();
        area_routers.insert(node.clone());
        Self {
            node,
            neighbor_states: BTreeMap::new(),
            link_state_db: BTreeMap::new(),
            area_routers,
            my_lsa_seq: 0,
            last_lsa_time: None,
            last_hello_time: None,
            topology_changed: true,
            lsa_seen: SeenCache::default(),
            routing_table: BTreeMap::new(),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn neighbor_states(&self) -> &BTreeMap<NodeId, NeighborState> {
        &self.neighbor_states
    }

    pub fn neighbor_costs(&self) -> BTreeMap<NodeId, u32> {
        self.neighbor_states
            .iter()
            .map(|(id, st)| (id.clone(), st.cost))
            .collect()
    }

    pub fn link_state_db(&self) -> &BTreeMap<NodeId, LsdbEntry> {
        &self.link_state_db
    }

    pub fn area_routers(&self) -> &BTreeSet<NodeId> {
        &self.area_routers
    }

    pub fn my_lsa_seq(&self) -> u64 {
        self.my_lsa_seq
    }

    pub fn routing_table(&self) -> &BTreeMap<NodeId, NodeId> {
        &self.routing_table
    }

    pub fn update_neighbor(&mut self, id: NodeId, cost: u32, now: Instant) {
        let entry = self.neighbor_states.entry(id).or_insert(NeighborState {
            cost,
            last_seen: now,
            alive: true,
        });
        entry.cost = cost;
        entry.last_seen = now;
        entry.alive = true;
        self.topology_changed = true;
    }

    pub fn process_packet(
        &mut self,
        packet: &mut Packet,
        from: Option<&NodeId>,
        now: Instant,
    ) -> Decision {
        packet.ensure_msg_id();

        if packet.kind == PacketKind::Hello {
            return self.handle_hello(packet, from, now);
        }
        if packet.kind.is_lsa() {
            return self.handle_lsa(packet, now);
        }

        match packet.to.node().and_then(|dest| self.routing_table.get(dest)) {
            Some(next) => Decision::NextHop(next.clone()),
            None => Decision::NoRoute,
        }
    }

    pub fn get_next_hop(&self, destination: &NodeId) -> Option<Route> {
        if *destination == self.node {
            return None;
        }
        self.routing_table
            .get(destination)
            .cloned()
            .map(Route::Neighbor)
    }

    /// HELLO only refreshes the sender's liveness record; it is never
    /// forwarded. When the transport could not attribute the packet to a
    /// peer, the `from` field is trusted if it names a known neighbor.
    fn handle_hello(&mut self, packet: &Packet, from: Option<&NodeId>, now: Instant) -> Decision {
        let neighbor = match from {
            Some(id) => Some(id.clone()),
            None => {
                let sender = packet.from.clone();
                self.neighbor_states.contains_key(&sender).then_some(sender)
            }
        };

        let Some(neighbor) = neighbor else {
            log::debug!("lsr({}): hello from unidentified peer {}, ignoring", self.node, packet.from);
            return Decision::ConsumeLocal;
        };

        let entry = self.neighbor_states.entry(neighbor).or_insert(NeighborState {
            cost: 1,
            last_seen: now,
            alive: true,
        });
        entry.last_seen = now;
        entry.alive = true;
        self.topology_changed = true;

        Decision::ConsumeLocal
    }

    fn handle_lsa(&mut self, packet: &mut Packet, now: Instant) -> Decision {
        if packet.path().contains(&self.node) {
            log::debug!("lsr({}): lsa cycle via path header, dropping {}", self.node, packet);
            return Decision::ConsumeLocal;
        }
        packet.record_hop(self.node.clone());

        let Some(payload) = decode_lsa_payload(&packet.payload) else {
            log::warn!("lsr({}): undecodable lsa payload from {}, dropping", self.node, packet.from);
            return Decision::ConsumeLocal;
        };

        // Weak anti-spoof: the advertisement must claim the sender as its
        // origin.
        if payload.origin != packet.from {
            log::warn!(
                "lsr({}): lsa origin {} does not match sender {}, dropping",
                self.node,
                payload.origin,
                packet.from
            );
            return Decision::ConsumeLocal;
        }

        if !self.lsa_seen.insert((payload.origin.clone(), payload.seq)) {
            return Decision::ConsumeLocal;
        }

        if let Some(current) = self.link_state_db.get(&payload.origin) {
            if payload.seq <= current.seq {
                log::debug!(
                    "lsr({}): obsolete lsa origin={} seq={} (have {})",
                    self.node,
                    payload.origin,
                    payload.seq,
                    current.seq
                );
                return Decision::ConsumeLocal;
            }
        }

        log::info!(
            "lsr({}): installed lsa origin={} seq={} neighbors={}",
            self.node,
            payload.origin,
            payload.seq,
            payload.neighbors.len()
        );
        self.link_state_db.insert(
            payload.origin.clone(),
            LsdbEntry {
                seq: payload.seq,
                neighbors: payload.neighbors,
                last_received: now,
            },
        );
        self.calculate_routes();

        Decision::FloodLsa
    }

    pub fn should_send_hello(&self, now: Instant) -> bool {
        self.last_hello_time
            .map_or(true, |t| now.duration_since(t) >= HELLO_INTERVAL)
    }

    pub fn create_hello_packet(&mut self, now: Instant) -> Packet {
        self.last_hello_time = Some(now);

        let mut packet = Packet::new(
            Proto::Lsr,
            PacketKind::Hello,
            self.node.clone(),
            Destination::Broadcast,
        )
        .with_ttl(HELLO_TTL);
        packet.ensure_msg_id();
        packet.headers.insert("ts", json!(unix_now()));
        packet
    }

    pub fn should_send_lsa(&self, now: Instant) -> bool {
        let min_elapsed = self
            .last_lsa_time
            .map_or(true, |t| now.duration_since(t) >= LSA_MIN_INTERVAL);
        let refresh_due = self
            .last_lsa_time
            .map_or(true, |t| now.duration_since(t) >= LSA_REFRESH_INTERVAL);
        (self.topology_changed && min_elapsed) || refresh_due
    }

    /// Emit this router's own advertisement: bump the sequence number,
    /// snapshot currently-alive neighbors, and pre-install the LSA locally
    /// so the reflood coming back from peers is discarded as already seen.
    pub fn create_lsa_packet(&mut self, now: Instant) -> Packet {
        self.my_lsa_seq += 1;
        self.last_lsa_time = Some(now);
        self.topology_changed = false;

        let neighbors: BTreeMap<NodeId, u32> = self
            .neighbor_states
            .iter()
            .filter(|(_, st)| st.alive && now.duration_since(st.last_seen) < NEIGHBOR_TIMEOUT)
            .map(|(id, st)| (id.clone(), st.cost))
            .collect();

        self.link_state_db.insert(
            self.node.clone(),
            LsdbEntry {
                seq: self.my_lsa_seq,
                neighbors: neighbors.clone(),
                last_received: now,
            },
        );
        self.lsa_seen.insert((self.node.clone(), self.my_lsa_seq));
        self.calculate_routes();

        let payload = LsaPayload {
            origin: self.node.clone(),
            seq: self.my_lsa_seq,
            neighbors,
            ts: unix_now(),
        };
        let payload_text =
            serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_owned());

        let mut packet = Packet::new(
            Proto::Lsr,
            PacketKind::Info,
            self.node.clone(),
            Destination::Broadcast,
        )
        .with_ttl(LSA_TTL)
        .with_payload(Value::String(payload_text));
        packet.ensure_msg_id();
        packet.headers.insert("seq", json!(self.my_lsa_seq));
        packet
    }

    /// Re-derive `alive` for every neighbor from its `last_seen`. Any
    /// transition marks the topology changed and reruns SPF. Returns
    /// whether anything flipped.
    pub fn check_neighbor_timeouts(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for (id, st) in self.neighbor_states.iter_mut() {
            let alive_now = now.duration_since(st.last_seen) < NEIGHBOR_TIMEOUT;
            if alive_now != st.alive {
                st.alive = alive_now;
                changed = true;
                if alive_now {
                    log::info!("lsr: neighbor {id} is alive");
                } else {
                    log::warn!("lsr: neighbor {id} timed out");
                }
            }
        }
        if changed {
            self.topology_changed = true;
            self.calculate_routes();
        }
        changed
    }

    /// Expire LSDB entries older than [`LSA_MAX_AGE`]. Returns whether any
    /// entry was dropped (which also reruns SPF).
    pub fn age_lsa_database(&mut self, now: Instant) -> bool {
        let before = self.link_state_db.len();
        self.link_state_db
            .retain(|origin, entry| {
                let keep = now.duration_since(entry.last_received) < LSA_MAX_AGE;
                if !keep {
                    log::info!("lsr: aged out lsa from {origin}");
                }
                keep
            });
        let removed = self.link_state_db.len() != before;
        if removed {
            self.topology_changed = true;
            self.calculate_routes();
        }
        removed
    }

    /// SPF: build the undirected adjacency from alive direct neighbors and
    /// the LSDB (minimum cost wins when directions disagree), run Dijkstra
    /// from self carrying a first-hop per vertex, and publish the table in
    /// one assignment. Candidate vertices are visited in name order so the
    /// whole computation is reproducible.
    fn calculate_routes(&mut self) {
        let mut adjacency: BTreeMap<NodeId, BTreeMap<NodeId, u32>> = BTreeMap::new();

        for (nb, st) in &self.neighbor_states {
            if st.alive {
                add_edge(&mut adjacency, &self.node, nb, st.cost);
            }
        }
        for (origin, entry) in &self.link_state_db {
            for (nb, &cost) in &entry.neighbors {
                add_edge(&mut adjacency, origin, nb, cost);
            }
        }

        self.area_routers = adjacency.keys().cloned().collect();
        self.area_routers.insert(self.node.clone());

        if !adjacency.contains_key(&self.node) {
            self.routing_table = BTreeMap::new();
            return;
        }

        let mut dist: BTreeMap<NodeId, u64> = BTreeMap::new();
        let mut first: BTreeMap<NodeId, Option<NodeId>> = BTreeMap::new();
        dist.insert(self.node.clone(), 0);

        let mut unvisited: BTreeSet<NodeId> = adjacency.keys().cloned().collect();
        while let Some(current) = unvisited
            .iter()
            .filter_map(|n| dist.get(n).map(|d| (*d, n.clone())))
            .min()
            .map(|(_, n)| n)
        {
            unvisited.remove(&current);
            let Some(&current_dist) = dist.get(&current) else {
                break;
            };
            let Some(edges) = adjacency.get(&current) else {
                continue;
            };

            for (next, &cost) in edges {
                if !unvisited.contains(next) {
                    continue;
                }
                let alt = current_dist + u64::from(cost);
                let candidate = if current == self.node {
                    Some(next.clone())
                } else {
                    first.get(&current).cloned().flatten()
                };

                let better = match dist.get(next) {
                    None => true,
                    Some(&d) if alt < d => true,
                    Some(&d) if alt == d => self.prefer_first_hop(
                        candidate.as_ref(),
                        first.get(next).and_then(|f| f.as_ref()),
                    ),
                    Some(_) => false,
                };
                if better {
                    dist.insert(next.clone(), alt);
                    first.insert(next.clone(), candidate);
                }
            }
        }

        let mut table = BTreeMap::new();
        for (dest, hop) in &first {
            if *dest == self.node {
                continue;
            }
            if let Some(hop) = hop {
                table.insert(dest.clone(), hop.clone());
            }
        }
        self.routing_table = table;
    }

    /// Equal-cost tie-break: (a) prefer having a first hop at all,
    /// (b) prefer one that is a currently-alive direct neighbor,
    /// (c) prefer the lexicographically smaller id.
    fn prefer_first_hop(&self, candidate: Option<&NodeId>, current: Option<&NodeId>) -> bool {
        match (candidate, current) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(candidate), Some(current)) => {
                let candidate_alive = self
                    .neighbor_states
                    .get(candidate)
                    .map_or(false, |st| st.alive);
                let current_alive = self
                    .neighbor_states
                    .get(current)
                    .map_or(false, |st| st.alive);
                if candidate_alive != current_alive {
                    candidate_alive
                } else {
                    candidate < current
                }
            }
        }
    }
}

fn add_edge(
    adjacency: &mut BTreeMap<NodeId, BTreeMap<NodeId, u32>>,
    a: &NodeId,
    b: &NodeId,
    cost: u32,
) {
    let forward = adjacency
        .entry(a.clone())
        .or_default()
        .entry(b.clone())
        .or_insert(cost);
    *forward = (*forward).min(cost);
    let reverse = adjacency
        .entry(b.clone())
        .or_default()
        .entry(a.clone())
        .or_insert(cost);
    *reverse = (*reverse).min(cost);
}

fn decode_lsa_payload(payload: &Value) -> Option<LsaPayload> {
    match payload {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Object(_) => serde_json::from_value(payload.clone()).ok(),
        _ => None,
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
