//! Loopback tests for the TCP stream transport: dialing, late peer
//! binding on accepted sockets, and resilience to malformed frames.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use ruta_transport::stream::{StreamConfig, StreamTransport};
use ruta_transport::{rx_channel, tx_channel, RxReceiver, TxKind, TxMessage, TxSender};
use ruta_wire::{NodeId, Packet, PacketKind, Proto};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

fn reserve_addrs(count: usize) -> Vec<SocketAddr> {
    let mut listeners = Vec::with_capacity(count);
    let mut addrs = Vec::with_capacity(count);
    for _ in 0..count {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        addrs.push(listener.local_addr().expect("ephemeral addr"));
        listeners.push(listener);
    }
    drop(listeners);
    addrs
}

async fn spawn_node(
    id: &str,
    listen: SocketAddr,
    peers: &[(&str, SocketAddr)],
    cancel: &CancellationToken,
) -> (TxSender, RxReceiver) {
    let (tx_send, tx_recv) = tx_channel();
    let (rx_send, rx_recv) = rx_channel();
    let config = StreamConfig {
        node: node(id),
        listen,
        peers: peers
            .iter()
            .map(|(peer, addr)| (node(peer), *addr))
            .collect::<BTreeMap<_, _>>(),
    };
    StreamTransport::spawn(config, rx_send, tx_recv, cancel.clone())
        .await
        .expect("spawn stream transport");
    (tx_send, rx_recv)
}

fn message(from: &str, to: &str, body: &str) -> Packet {
    let mut packet = Packet::new(Proto::Dijkstra, PacketKind::Message, node(from), node(to))
        .with_payload(serde_json::Value::String(body.to_owned()));
    packet.ensure_msg_id();
    packet
}

#[tokio::test]
async fn direct_send_crosses_the_link_and_binds_the_peer() {
    let addrs = reserve_addrs(2);
    let cancel = CancellationToken::new();

    // b first, so its listener is up before a dials.
    let (_tx_b, mut rx_b) = spawn_node("b", addrs[1], &[("a", addrs[0])], &cancel).await;
    let (tx_a, _rx_a) = spawn_node("a", addrs[0], &[("b", addrs[1])], &cancel).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let packet = message("a", "b", "hi");
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
    // Accepted socket, identified by the first packet's `from`.
    assert_eq!(received.peer, Some(node("a")));

    cancel.cancel();
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_killing_the_link() {
    let addrs = reserve_addrs(1);
    let cancel = CancellationToken::new();

    let (_tx_b, mut rx_b) = spawn_node("b", addrs[0], &[], &cancel).await;

    // Raw socket playing the part of neighbor a... badly at first.
    let mut raw = tokio::net::TcpStream::connect(addrs[0])
        .await
        .expect("connect to listener");
    raw.write_all(b"{definitely not json").await.expect("write garbage");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let packet = message("a", "b", "after the garbage");
    raw.write_all(packet.to_json().expect("encode").as_bytes())
        .await
        .expect("write packet");

    let received = timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("packet within deadline")
        .expect("rx channel open");
    assert_eq!(received.packet, packet);

    cancel.cancel();
}

#[tokio::test]
async fn broadcast_skips_the_excluded_peer() {
    let addrs = reserve_addrs(3);
    let cancel = CancellationToken::new();

    let (_tx_b, mut rx_b) = spawn_node("b", addrs[1], &[], &cancel).await;
    let (_tx_c, mut rx_c) = spawn_node("c", addrs[2], &[], &cancel).await;
    let (tx_a, _rx_a) =
        spawn_node("a", addrs[0], &[("b", addrs[1]), ("c", addrs[2])], &cancel).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let packet = message("a", "z", "flooded");
    tx_a.send(TxMessage {
        kind: TxKind::Broadcast {
            exclude: Some(node("c")),
        },
        packet: packet.clone(),
    })
    .await
    .expect("queue send");

    let received = timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("b gets the broadcast")
        .expect("rx channel open");
    assert_eq!(received.packet, packet);

    // c was the excluded sender; nothing should arrive there.
    assert!(
        timeout(Duration::from_millis(300), rx_c.recv()).await.is_err(),
        "excluded peer must not receive the broadcast"
    );

    cancel.cancel();
}
