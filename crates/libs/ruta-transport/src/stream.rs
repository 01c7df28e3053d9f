//! Point-to-point TCP stream transport.
//!
//! One listening socket accepts inbound links; the transport separately
//! dials every configured neighbor and keeps retrying on a slow tick.
//! Frames are single JSON objects, at most [`FRAME_SIZE`] bytes, one per
//! read. Outbound links are keyed by neighbor id; accepted links start
//! anonymous and are bound to a neighbor by the `from` field of the first
//! packet they deliver.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;

use ruta_wire::{NodeId, Packet};

use crate::error::TransportError;
use crate::{RxMessage, RxSender, TxKind, TxReceiver};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(15);
pub const FRAME_SIZE: usize = 4096;

const PEER_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub node: NodeId,
    pub listen: SocketAddr,
    pub peers: BTreeMap<NodeId, SocketAddr>,
}

type PeerMap = Arc<Mutex<HashMap<NodeId, mpsc::Sender<Packet>>>>;

pub struct StreamTransport;

impl StreamTransport {
    /// Bind the listener and spawn the accept, reconnect and dispatch
    /// loops. Returns once the listener is bound; a bind failure is a
    /// startup error, everything after that is logs and retries.
    pub async fn spawn(
        config: StreamConfig,
        rx: RxSender,
        tx: TxReceiver,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let listener = TcpListener::bind(config.listen).await?;
        log::info!("stream({}): listening on {}", config.node, config.listen);

        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));

        {
            let config = config.clone();
            let rx = rx.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_accept_loop(config, listener, rx, cancel));
        }
        {
            let config = config.clone();
            let peers = peers.clone();
            let rx = rx.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_connect_loop(config, peers, rx, cancel));
        }
        tokio::spawn(run_dispatch_loop(config.node.clone(), peers, tx, cancel));

        Ok(())
    }
}

async fn run_accept_loop(
    config: StreamConfig,
    listener: TcpListener,
    rx: RxSender,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    log::debug!("stream({}): accepted connection from {}", config.node, addr);
                    tokio::spawn(run_accepted(
                        config.clone(),
                        socket,
                        rx.clone(),
                        cancel.clone(),
                    ));
                }
                Err(err) => {
                    log::warn!("stream({}): accept failed: {}", config.node, err);
                }
            }
        }
    }
}

/// Read loop for an accepted socket. The remote end is anonymous until its
/// first packet names a configured neighbor in `from`.
async fn run_accepted(
    config: StreamConfig,
    mut socket: TcpStream,
    rx: RxSender,
    cancel: CancellationToken,
) {
    let mut peer: Option<NodeId> = None;
    let mut buf = vec![0u8; FRAME_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = socket.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => match Packet::from_json(&buf[..n]) {
                    Ok(packet) => {
                        if peer.is_none() && config.peers.contains_key(&packet.from) {
                            log::debug!(
                                "stream({}): inbound link identified as {}",
                                config.node,
                                packet.from
                            );
                            peer = Some(packet.from.clone());
                        }
                        if rx.send(RxMessage { peer: peer.clone(), packet }).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("stream({}): malformed packet: {}", config.node, err);
                    }
                },
                Err(err) => {
                    log::warn!("stream({}): inbound link error: {}", config.node, err);
                    break;
                }
            }
        }
    }
}

/// Dial every neighbor that has no active link, then sleep a tick and try
/// again. Each attempt gets [`CONNECT_TIMEOUT`]; failures wait for the
/// next tick.
async fn run_connect_loop(
    config: StreamConfig,
    peers: PeerMap,
    rx: RxSender,
    cancel: CancellationToken,
) {
    loop {
        for (id, addr) in &config.peers {
            if cancel.is_cancelled() {
                return;
            }
            let connected = peers.lock().await.contains_key(id);
            if !connected {
                connect_peer(&config, id, *addr, &peers, &rx, &cancel).await;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(RECONNECT_INTERVAL) => {}
        }
    }
}

async fn connect_peer(
    config: &StreamConfig,
    id: &NodeId,
    addr: SocketAddr,
    peers: &PeerMap,
    rx: &RxSender,
    cancel: &CancellationToken,
) {
    let socket = match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(err)) => {
            log::warn!(
                "stream({}): could not connect to {} at {}: {}",
                config.node,
                id,
                addr,
                err
            );
            return;
        }
        Err(_) => {
            log::warn!(
                "stream({}): connect to {} at {} timed out after {:?}",
                config.node,
                id,
                addr,
                CONNECT_TIMEOUT
            );
            return;
        }
    };

    log::info!("stream({}): [CONNECTED] to neighbor {}", config.node, id);

    let (read_half, write_half) = socket.into_split();
    let (queue_tx, queue_rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
    peers.lock().await.insert(id.clone(), queue_tx);

    tokio::spawn(run_writer(
        config.node.clone(),
        id.clone(),
        write_half,
        queue_rx,
        peers.clone(),
        cancel.clone(),
    ));
    tokio::spawn(run_peer_reader(
        config.node.clone(),
        id.clone(),
        read_half,
        rx.clone(),
        peers.clone(),
        cancel.clone(),
    ));
}

/// Drain the per-peer queue onto the socket. A send failure tears the link
/// down; the reconnect tick will dial again.
async fn run_writer(
    node: NodeId,
    id: NodeId,
    mut write_half: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Packet>,
    peers: PeerMap,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            packet = queue.recv() => {
                let Some(packet) = packet else { break };
                let encoded = match packet.to_json() {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        log::warn!("stream({node}): encode failed: {err}");
                        continue;
                    }
                };
                if encoded.len() > FRAME_SIZE {
                    log::warn!(
                        "stream({node}): frame of {} bytes to {id} exceeds {FRAME_SIZE}, dropping",
                        encoded.len()
                    );
                    continue;
                }
                if let Err(err) = write_half.write_all(encoded.as_bytes()).await {
                    log::warn!("stream({node}): send to {id} failed: {err}");
                    break;
                }
            }
        }
    }
    drop_peer(&node, &id, &peers).await;
}

/// Read loop for a dialed link; the peer is known from the address we
/// connected to.
async fn run_peer_reader(
    node: NodeId,
    id: NodeId,
    mut read_half: OwnedReadHalf,
    rx: RxSender,
    peers: PeerMap,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; FRAME_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_half.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => match Packet::from_json(&buf[..n]) {
                    Ok(packet) => {
                        if rx
                            .send(RxMessage { peer: Some(id.clone()), packet })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("stream({node}): malformed packet from {id}: {err}");
                    }
                },
                Err(err) => {
                    log::warn!("stream({node}): link to {id} failed: {err}");
                    break;
                }
            }
        }
    }
    drop_peer(&node, &id, &peers).await;
}

async fn drop_peer(node: &NodeId, id: &NodeId, peers: &PeerMap) {
    if peers.lock().await.remove(id).is_some() {
        log::info!("stream({node}): [DISCONNECTED] from neighbor {id}");
    }
}

/// Fan outbound messages out to per-peer queues. A missing link is logged
/// and the send abandoned — liveness decisions belong to the routing
/// layer, not here.
async fn run_dispatch_loop(
    node: NodeId,
    peers: PeerMap,
    mut tx: TxReceiver,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = tx.recv() => {
                let Some(message) = message else { break };

                let targets: Vec<(NodeId, mpsc::Sender<Packet>)> = {
                    let peers = peers.lock().await;
                    match &message.kind {
                        TxKind::Direct(id) => match peers.get(id) {
                            Some(sender) => vec![(id.clone(), sender.clone())],
                            None => {
                                log::warn!("stream({node}): no active link to {id}, dropping {}", message.packet);
                                Vec::new()
                            }
                        },
                        TxKind::Broadcast { exclude } => peers
                            .iter()
                            .filter(|(id, _)| exclude.as_ref() != Some(id))
                            .map(|(id, sender)| (id.clone(), sender.clone()))
                            .collect(),
                    }
                };

                for (id, sender) in targets {
                    if sender.send(message.packet.clone()).await.is_err() {
                        log::warn!("stream({node}): link to {id} went away mid-send");
                    }
                }
            }
        }
    }
}
