//! Bus transport tests against a miniature in-process RESP broker.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ruta_transport::bus::{BusConfig, BusTransport};
use ruta_transport::resp::{encode_command, read_reply, Reply};
use ruta_transport::{rx_channel, tx_channel, RxReceiver, TxKind, TxMessage, TxSender};
use ruta_wire::{Destination, NodeId, Packet, PacketKind, Proto};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type Subscribers = Arc<Mutex<Vec<(Vec<String>, Arc<Mutex<OwnedWriteHalf>>)>>>;

/// Just enough broker to carry AUTH, SUBSCRIBE and PUBLISH.
async fn spawn_fake_broker() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker");
    let addr = listener.local_addr().expect("broker addr");
    let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let subscribers = subscribers.clone();
            tokio::spawn(async move {
                let (read_half, write_half) = socket.into_split();
                let mut reader = BufReader::new(read_half);
                let writer = Arc::new(Mutex::new(write_half));

                loop {
                    let Ok(reply) = read_reply(&mut reader).await else {
                        break;
                    };
                    let Reply::Array(Some(parts)) = reply else {
                        continue;
                    };
                    let parts: Vec<Vec<u8>> = parts
                        .iter()
                        .filter_map(|p| p.as_bulk().map(<[u8]>::to_vec))
                        .collect();
                    let Some(command) = parts.first() else {
                        continue;
                    };

                    match command.to_ascii_uppercase().as_slice() {
                        b"AUTH" => {
                            let _ = writer.lock().await.write_all(b"+OK\r\n").await;
                        }
                        b"SUBSCRIBE" => {
                            let channels: Vec<String> = parts[1..]
                                .iter()
                                .map(|c| String::from_utf8_lossy(c).into_owned())
                                .collect();
                            let mut out = Vec::new();
                            for (i, channel) in channels.iter().enumerate() {
                                out.extend_from_slice(
                                    format!(
                                        "*3\r\n$9\r\nsubscribe\r\n${}\r\n{}\r\n:{}\r\n",
                                        channel.len(),
                                        channel,
                                        i + 1
                                    )
                                    .as_bytes(),
                                );
                            }
                            subscribers.lock().await.push((channels, writer.clone()));
                            let _ = writer.lock().await.write_all(&out).await;
                        }
                        b"PUBLISH" if parts.len() == 3 => {
                            let channel = String::from_utf8_lossy(&parts[1]).into_owned();
                            let mut delivered = 0;
                            for (channels, sub_writer) in subscribers.lock().await.iter() {
                                if channels.contains(&channel) {
                                    let push = encode_command(&[
                                        b"message",
                                        channel.as_bytes(),
                                        &parts[2],
                                    ]);
                                    let _ = sub_writer.lock().await.write_all(&push).await;
                                    delivered += 1;
                                }
                            }
                            let _ = writer
                                .lock()
                                .await
                                .write_all(format!(":{delivered}\r\n").as_bytes())
                                .await;
                        }
                        _ => {
                            let _ = writer.lock().await.write_all(b"-ERR unknown\r\n").await;
                        }
                    }
                }
            });
        }
    });

    addr
}

fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

async fn spawn_bus_node(
    id: &str,
    broker: SocketAddr,
    peers: &[&str],
    cancel: &CancellationToken,
) -> (TxSender, RxReceiver) {
    let (tx_send, tx_recv) = tx_channel();
    let (rx_send, rx_recv) = rx_channel();
    let config = BusConfig {
        node: node(id),
        broker: broker.to_string(),
        password: Some("hunter2".to_owned()),
        own_channel: format!("ch.{id}"),
        peer_channels: peers
            .iter()
            .map(|peer| (node(peer), format!("ch.{peer}")))
            .collect::<BTreeMap<_, _>>(),
        subscribe_peers: true,
    };
    BusTransport::spawn(config, rx_send, tx_recv, cancel.clone())
        .await
        .expect("spawn bus transport");
    (tx_send, rx_recv)
}

fn message(from: &str, to: Destination, body: &str) -> Packet {
    let mut packet = Packet::new(Proto::Flooding, PacketKind::Message, node(from), to)
        .with_payload(serde_json::Value::String(body.to_owned()));
    packet.ensure_msg_id();
    packet
}

#[tokio::test]
async fn unicast_reaches_the_destination_channel() {
    let broker = spawn_fake_broker().await;
    let cancel = CancellationToken::new();

    let (_tx_b, mut rx_b) = spawn_bus_node("b", broker, &["a"], &cancel).await;
    let (tx_a, _rx_a) = spawn_bus_node("a", broker, &["b"], &cancel).await;

    let packet = message("a", Destination::Node(node("b")), "over the bus");
    tx_a.send(TxMessage {
        kind: TxKind::Direct(node("b")),
        packet: packet.clone(),
    })
    .await
    .expect("queue send");

    let received = timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("packet within deadline")
        .expect("rx channel open");
    assert_eq!(received.packet, packet);

    cancel.cancel();
}

#[tokio::test]
async fn own_broadcast_echo_is_filtered_out() {
    let broker = spawn_fake_broker().await;
    let cancel = CancellationToken::new();

    let (_tx_b, mut rx_b) = spawn_bus_node("b", broker, &["a"], &cancel).await;
    let (tx_a, mut rx_a) = spawn_bus_node("a", broker, &["b"], &cancel).await;

    let packet = message("a", Destination::Broadcast, "hello everyone");
    tx_a.send(TxMessage {
        kind: TxKind::Broadcast { exclude: None },
        packet: packet.clone(),
    })
    .await
    .expect("queue send");

    let received = timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("packet within deadline")
        .expect("rx channel open");
    assert_eq!(received.packet, packet);

    // a is subscribed to ch.b as well, so the broker echoes the publish
    // back — the transport's self-filter must swallow it.
    assert!(
        timeout(Duration::from_millis(300), rx_a.recv()).await.is_err(),
        "sender must not see its own broadcast"
    );

    cancel.cancel();
}
