//! The router engine: wires the transport to the routing algorithm.
//!
//! Two long-lived tasks per router. The rx task drains inbound packets,
//! runs duplicate suppression and TTL accounting, and dispatches on the
//! algorithm's decision. The periodic task ticks once a second and pulls
//! any due control packets out of the algorithm (`should_send_*` /
//! `create_*_packet`), so the algorithm itself never performs I/O.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use ruta_routing::lsr::HELLO_INTERVAL;
use ruta_routing::{Algorithm, Decision, Route, SeenCache};
use ruta_transport::{RxMessage, RxReceiver, TxKind, TxMessage, TxSender};
use ruta_wire::{Destination, NodeId, Packet, PacketKind, Proto};

const PACKET_LOG_CAPACITY: usize = 100;
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Traffic surfaced to the user interface.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MessageReceived {
        from: NodeId,
        payload: serde_json::Value,
    },
    EchoReply {
        from: NodeId,
        payload: serde_json::Value,
    },
}

/// Bounded in-memory log of recent packet activity, backing the `logs`
/// REPL command.
struct PacketLog {
    entries: VecDeque<String>,
}

impl PacketLog {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn push(&mut self, line: String) {
        if self.entries.len() >= PACKET_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }

    fn tail(&self, count: usize) -> Vec<String> {
        self.entries
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }
}

pub struct Engine {
    node: NodeId,
    algorithm: Mutex<Algorithm>,
    seen: Mutex<SeenCache<String>>,
    packet_log: Mutex<PacketLog>,
    last_presence_hello: Mutex<Option<Instant>>,
    tx: TxSender,
    events: broadcast::Sender<EngineEvent>,
    topology: BTreeMap<NodeId, Vec<NodeId>>,
    neighbors: BTreeMap<NodeId, u32>,
    started: Instant,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        node: NodeId,
        algorithm: Algorithm,
        topology: BTreeMap<NodeId, Vec<NodeId>>,
        neighbors: BTreeMap<NodeId, u32>,
        tx: TxSender,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            node,
            algorithm: Mutex::new(algorithm),
            seen: Mutex::new(SeenCache::default()),
            packet_log: Mutex::new(PacketLog::new()),
            last_presence_hello: Mutex::new(None),
            tx,
            events,
            topology,
            neighbors,
            started: Instant::now(),
            cancel,
        })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn topology(&self) -> &BTreeMap<NodeId, Vec<NodeId>> {
        &self.topology
    }

    pub fn neighbors(&self) -> &BTreeMap<NodeId, u32> {
        &self.neighbors
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Inspect the algorithm under its lock.
    pub async fn with_algorithm<R>(&self, inspect: impl FnOnce(&Algorithm) -> R) -> R {
        inspect(&*self.algorithm.lock().await)
    }

    pub async fn packet_log_tail(&self, count: usize) -> Vec<String> {
        self.packet_log.lock().await.tail(count)
    }

    /// Start the rx and periodic tasks.
    pub fn spawn(self: &Arc<Self>, rx: RxReceiver) {
        {
            let engine = self.clone();
            tokio::spawn(engine.run_rx(rx));
        }
        let engine = self.clone();
        tokio::spawn(engine.run_periodic());
    }

    async fn run_rx(self: Arc<Self>, mut rx: RxReceiver) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    self.handle_rx(message).await;
                }
            }
        }
    }

    async fn handle_rx(&self, message: RxMessage) {
        let RxMessage { peer, mut packet } = message;

        let msg_id = packet.ensure_msg_id().to_owned();
        self.log_packet("RECEIVED", &packet, peer.as_ref()).await;

        if !self.seen.lock().await.insert(msg_id) {
            log::debug!("engine({}): duplicate {}, dropping", self.node, packet);
            return;
        }

        if packet.to.is_group() {
            let decision = self
                .algorithm
                .lock()
                .await
                .process_packet(&mut packet, peer.as_ref(), Instant::now());
            match decision {
                Decision::Flood | Decision::FloodLsa => {
                    if !packet.decrement_ttl() {
                        log::warn!("engine({}): [DROPPED] broadcast TTL expired: {}", self.node, packet);
                        return;
                    }
                    self.fan_out(packet, peer).await;
                }
                Decision::NextHop(next) => self.send_to_neighbor(packet, next).await,
                Decision::ConsumeLocal => {}
                Decision::NoRoute => {
                    log::warn!("engine({}): [DROPPED] No route for broadcast {}", self.node, packet);
                }
            }
            return;
        }

        if packet.to.node() == Some(&self.node) {
            self.deliver_local(packet).await;
            return;
        }

        if !packet.decrement_ttl() {
            log::warn!("engine({}): [DROPPED] TTL expired: {}", self.node, packet);
            return;
        }

        let decision = self
            .algorithm
            .lock()
            .await
            .process_packet(&mut packet, peer.as_ref(), Instant::now());
        match decision {
            Decision::Flood | Decision::FloodLsa => self.fan_out(packet, peer).await,
            Decision::NextHop(next) => self.send_to_neighbor(packet, next).await,
            Decision::ConsumeLocal => {}
            Decision::NoRoute => {
                log::warn!(
                    "engine({}): [DROPPED] No route to destination {}",
                    self.node,
                    packet.to
                );
            }
        }
    }

    /// The packet is addressed to this router.
    async fn deliver_local(&self, packet: Packet) {
        match packet.kind {
            PacketKind::Message => {
                log::info!("engine({}): message received from {}", self.node, packet.from);
                let _ = self.events.send(EngineEvent::MessageReceived {
                    from: packet.from,
                    payload: packet.payload,
                });
            }
            PacketKind::Echo => {
                let reply = Packet::new(
                    packet.proto,
                    PacketKind::EchoReply,
                    self.node.clone(),
                    packet.from.clone(),
                )
                .with_payload(serde_json::Value::String(format!(
                    "Echo reply from {}",
                    self.node
                )));
                self.originate(reply).await;
            }
            PacketKind::EchoReply => {
                let _ = self.events.send(EngineEvent::EchoReply {
                    from: packet.from,
                    payload: packet.payload,
                });
            }
            PacketKind::Hello | PacketKind::Info | PacketKind::Lsa => {
                log::debug!(
                    "engine({}): {} addressed to self, nothing to do",
                    self.node,
                    packet
                );
            }
        }
    }

    /// Send a user message. The payload travels as a JSON string.
    pub async fn send_message(&self, destination: Destination, body: String) {
        let proto = self.algorithm.lock().await.proto();
        let packet = Packet::new(proto, PacketKind::Message, self.node.clone(), destination)
            .with_payload(serde_json::Value::String(body));
        self.originate(packet).await;
    }

    pub async fn send_echo(&self, destination: Destination) {
        let proto = self.algorithm.lock().await.proto();
        let packet = Packet::new(proto, PacketKind::Echo, self.node.clone(), destination)
            .with_payload(serde_json::Value::String("Echo request".to_owned()));
        self.originate(packet).await;
    }

    /// Originate a packet at this router: stamp a fresh msg id, pre-install
    /// it in the dedup cache so our own broadcast echoes are dropped, and
    /// route it.
    pub async fn originate(&self, mut packet: Packet) {
        let msg_id = packet.ensure_msg_id().to_owned();
        self.seen.lock().await.insert(msg_id);
        self.log_packet("SENT", &packet, None).await;

        let destination = packet.to.node().cloned();
        let route = match &destination {
            Some(dest) => self.algorithm.lock().await.get_next_hop(dest),
            None => None,
        };

        match route {
            Some(Route::Flood) => self.fan_out(packet, None).await,
            Some(Route::Neighbor(next)) => self.send_to_neighbor(packet, next).await,
            None => {
                // A destination we have no route for yet may still be a
                // direct neighbor.
                if let Some(dest) = destination {
                    if self.neighbors.contains_key(&dest) {
                        self.send_to_neighbor(packet, dest).await;
                        return;
                    }
                }
                log::warn!(
                    "engine({}): [DROPPED] No route to destination {}",
                    self.node,
                    packet.to
                );
            }
        }
    }

    /// Broadcast a control packet (HELLO / LSA) to every peer.
    async fn broadcast_control(&self, mut packet: Packet) {
        let msg_id = packet.ensure_msg_id().to_owned();
        self.seen.lock().await.insert(msg_id);
        self.log_packet("SENT", &packet, None).await;
        self.submit(TxMessage {
            kind: TxKind::Broadcast { exclude: None },
            packet,
        })
        .await;
    }

    async fn fan_out(&self, packet: Packet, exclude: Option<NodeId>) {
        self.log_packet("FLOODED", &packet, exclude.as_ref()).await;
        self.submit(TxMessage {
            kind: TxKind::Broadcast { exclude },
            packet,
        })
        .await;
    }

    async fn send_to_neighbor(&self, packet: Packet, neighbor: NodeId) {
        self.log_packet("FORWARDED", &packet, Some(&neighbor)).await;
        self.submit(TxMessage {
            kind: TxKind::Direct(neighbor),
            packet,
        })
        .await;
    }

    async fn submit(&self, message: TxMessage) {
        if self.tx.send(message).await.is_err() {
            log::warn!("engine({}): transport is gone, dropping outbound packet", self.node);
        }
    }

    /// One-second tick driving the pull-based control plane.
    async fn run_periodic(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(TICK_INTERVAL) => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let now = Instant::now();
        let mut due: Vec<Packet> = Vec::new();

        {
            let mut algorithm = self.algorithm.lock().await;
            match &mut *algorithm {
                Algorithm::Lsr(lsr) => {
                    if lsr.should_send_hello(now) {
                        due.push(lsr.create_hello_packet(now));
                    }
                    if lsr.should_send_lsa(now) {
                        due.push(lsr.create_lsa_packet(now));
                    }
                    lsr.check_neighbor_timeouts(now);
                    lsr.age_lsa_database(now);
                }
                Algorithm::Flooding(_) => {
                    // Presence beacon; receivers absorb it.
                    let mut last = self.last_presence_hello.lock().await;
                    let hello_due = last.map_or(true, |t| now.duration_since(t) >= HELLO_INTERVAL);
                    if hello_due {
                        *last = Some(now);
                        due.push(
                            Packet::new(
                                Proto::Flooding,
                                PacketKind::Hello,
                                self.node.clone(),
                                Destination::Broadcast,
                            )
                            .with_payload(serde_json::Value::String(format!(
                                "Hello from {}",
                                self.node
                            ))),
                        );
                    }
                }
                Algorithm::Dijkstra(_) => {}
            }
        }

        for packet in due {
            self.broadcast_control(packet).await;
        }
    }

    async fn log_packet(&self, action: &str, packet: &Packet, via: Option<&NodeId>) {
        let via_info = via.map(|id| format!(" via {id}")).unwrap_or_default();
        let id_info = packet
            .msg_id()
            .map(|id| format!(" [id={id}]"))
            .unwrap_or_default();
        let line = format!(
            "{:>7.1}s [{action}]{via_info} {packet}{id_info}",
            self.started.elapsed().as_secs_f32()
        );
        log::info!("engine({}): {line}", self.node);
        self.packet_log.lock().await.push(line);
    }
}
