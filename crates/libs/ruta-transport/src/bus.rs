//! Pub/sub bus transport over a RESP (Redis-protocol) broker.
//!
//! Every node owns one channel. Unicast publishes to the destination's
//! channel; broadcast publishes to every neighbor's channel, and because
//! flooding-style algorithms also subscribe to their neighbors' channels,
//! a broadcast published to node N's channel is overheard by all of N's
//! neighbors. RESP2 subscriber connections cannot issue PUBLISH, so the
//! transport keeps two connections: one subscribed, one publishing.

use std::collections::BTreeMap;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use ruta_wire::{NodeId, Packet};

use crate::error::TransportError;
use crate::resp::{encode_command, read_reply, Reply};
use crate::{RxMessage, RxSender, TxKind, TxReceiver};

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub node: NodeId,
    /// Broker endpoint, `host:port`.
    pub broker: String,
    pub password: Option<String>,
    pub own_channel: String,
    /// Neighbor id -> that neighbor's channel.
    pub peer_channels: BTreeMap<NodeId, String>,
    /// Flooding and LSR listen on neighbor channels so broadcasts
    /// published there are visible; Dijkstra needs only its own channel.
    pub subscribe_peers: bool,
}

pub struct BusTransport;

impl BusTransport {
    /// Connect both broker links, subscribe, and spawn the reader and
    /// publisher loops. Returns once the handshakes are done — a broker
    /// that cannot be reached at startup is a configuration-level error.
    pub async fn spawn(
        config: BusConfig,
        rx: RxSender,
        tx: TxReceiver,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut subscriber = connect_broker(&config).await?;

        let mut channels = vec![config.own_channel.clone()];
        if config.subscribe_peers {
            for channel in config.peer_channels.values() {
                if !channels.contains(channel) {
                    channels.push(channel.clone());
                }
            }
        }
        subscribe(&mut subscriber, &channels).await?;
        log::info!(
            "bus({}): subscribed to {} channel(s) on {}",
            config.node,
            channels.len(),
            config.broker
        );

        let publisher = connect_broker(&config).await?;

        {
            let config = config.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_reader(config, subscriber, rx, cancel));
        }
        tokio::spawn(run_publisher(config, publisher, tx, cancel));

        Ok(())
    }
}

async fn connect_broker(config: &BusConfig) -> Result<BufReader<TcpStream>, TransportError> {
    let socket = TcpStream::connect(&config.broker).await?;
    let mut stream = BufReader::new(socket);

    if let Some(password) = config.password.as_deref() {
        if !password.is_empty() {
            let command = encode_command(&[b"AUTH", password.as_bytes()]);
            stream.get_mut().write_all(&command).await?;
            match read_reply(&mut stream).await? {
                Reply::Simple(_) => {}
                Reply::Error(reply) => {
                    return Err(TransportError::BrokerRefused {
                        command: "AUTH".to_owned(),
                        reply,
                    })
                }
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected AUTH reply: {other:?}"
                    )))
                }
            }
        }
    }

    Ok(stream)
}

async fn subscribe(
    stream: &mut BufReader<TcpStream>,
    channels: &[String],
) -> Result<(), TransportError> {
    let mut parts: Vec<&[u8]> = vec![b"SUBSCRIBE"];
    parts.extend(channels.iter().map(|c| c.as_bytes()));
    stream.get_mut().write_all(&encode_command(&parts)).await?;

    // One confirmation push per channel.
    for _ in channels {
        match read_reply(stream).await? {
            Reply::Array(Some(_)) => {}
            Reply::Error(reply) => {
                return Err(TransportError::BrokerRefused {
                    command: "SUBSCRIBE".to_owned(),
                    reply,
                })
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected SUBSCRIBE reply: {other:?}"
                )))
            }
        }
    }
    Ok(())
}

async fn run_reader(
    config: BusConfig,
    mut subscriber: BufReader<TcpStream>,
    rx: RxSender,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            reply = read_reply(&mut subscriber) => match reply {
                Ok(reply) => {
                    if !handle_push(&config, reply, &rx).await {
                        break;
                    }
                }
                Err(TransportError::Closed) => {
                    log::warn!("bus({}): broker connection closed", config.node);
                    break;
                }
                Err(err) => {
                    // A framing error desynchronizes the connection; bail
                    // rather than misread everything after it.
                    log::warn!("bus({}): broker stream error: {}", config.node, err);
                    break;
                }
            }
        }
    }
}

/// Decode one subscriber push. Returns `false` only when the engine side
/// of the rx channel is gone.
async fn handle_push(config: &BusConfig, reply: Reply, rx: &RxSender) -> bool {
    let Reply::Array(Some(items)) = reply else {
        return true;
    };
    if items.len() != 3 {
        return true;
    }
    let (Some(kind), Some(channel), Some(payload)) =
        (items[0].as_bulk(), items[1].as_bulk(), items[2].as_bulk())
    else {
        return true;
    };
    if kind != b"message" {
        // subscribe/unsubscribe confirmations
        return true;
    }

    let packet = match Packet::from_json(payload) {
        Ok(packet) => packet,
        Err(err) => {
            log::warn!("bus({}): malformed packet: {}", config.node, err);
            return true;
        }
    };

    // Multi-subscription means our own broadcasts come back to us.
    if packet.from == config.node {
        return true;
    }

    let channel = String::from_utf8_lossy(channel);
    let peer = config
        .peer_channels
        .iter()
        .find(|(_, ch)| ch.as_str() == channel)
        .map(|(id, _)| id.clone());

    rx.send(RxMessage { peer, packet }).await.is_ok()
}

async fn run_publisher(
    config: BusConfig,
    mut publisher: BufReader<TcpStream>,
    mut tx: TxReceiver,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = tx.recv() => {
                let Some(message) = message else { break };

                let encoded = match message.packet.to_json() {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        log::warn!("bus({}): encode failed: {}", config.node, err);
                        continue;
                    }
                };

                let targets: Vec<(NodeId, String)> = match &message.kind {
                    TxKind::Direct(id) => match config.peer_channels.get(id) {
                        Some(channel) => vec![(id.clone(), channel.clone())],
                        None => {
                            log::warn!(
                                "bus({}): no channel for {}, dropping {}",
                                config.node,
                                id,
                                message.packet
                            );
                            Vec::new()
                        }
                    },
                    TxKind::Broadcast { exclude } => config
                        .peer_channels
                        .iter()
                        .filter(|(id, _)| exclude.as_ref() != Some(id))
                        .map(|(id, channel)| (id.clone(), channel.clone()))
                        .collect(),
                };

                for (id, channel) in targets {
                    if let Err(err) = publish(&mut publisher, &channel, encoded.as_bytes()).await {
                        log::warn!("bus({}): publish to {} failed: {}", config.node, id, err);
                    }
                }
            }
        }
    }
}

async fn publish(
    publisher: &mut BufReader<TcpStream>,
    channel: &str,
    payload: &[u8],
) -> Result<(), TransportError> {
    let command = encode_command(&[b"PUBLISH", channel.as_bytes(), payload]);
    publisher.get_mut().write_all(&command).await?;
    match read_reply(publisher).await? {
        Reply::Integer(_) => Ok(()),
        Reply::Error(reply) => Err(TransportError::BrokerRefused {
            command: "PUBLISH".to_owned(),
            reply,
        }),
        other => Err(TransportError::Protocol(format!(
            "unexpected PUBLISH reply: {other:?}"
        ))),
    }
}
