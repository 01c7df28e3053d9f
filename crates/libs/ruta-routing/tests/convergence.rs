//! Multi-router SPF convergence checks: feed every router the same set of
//! advertisements and verify the resulting tables are shortest-path and
//! identical across routers with identical inputs.

use std::collections::BTreeMap;
use std::time::Instant;

use ruta_routing::{Decision, LsrState};
use ruta_wire::{Destination, NodeId, Packet, PacketKind, Proto};
use serde_json::json;

fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

fn lsa(origin: &str, seq: u64, neighbors: &[(&str, u32)]) -> Packet {
    let neighbors: BTreeMap<String, u32> =
        neighbors.iter().map(|(n, c)| ((*n).to_owned(), *c)).collect();
    let payload = json!({"origin": origin, "seq": seq, "neighbors": neighbors});
    let mut packet = Packet::new(
        Proto::Lsr,
        PacketKind::Info,
        node(origin),
        Destination::Broadcast,
    )
    .with_ttl(16)
    .with_payload(serde_json::Value::String(payload.to_string()));
    packet.ensure_msg_id();
    packet
}

/// Square a-b-c-d-a. Every router learns the full topology and routes each
/// destination out of a first hop that lies on a shortest path.
#[test]
fn square_topology_converges_to_shortest_paths() {
    let now = Instant::now();
    let edges: &[(&str, &[(&str, u32)])] = &[
        ("a", &[("b", 1), ("d", 1)]),
        ("b", &[("a", 1), ("c", 1)]),
        ("c", &[("b", 1), ("d", 1)]),
        ("d", &[("a", 1), ("c", 1)]),
    ];

    let mut a = LsrState::new(node("a"));
    a.update_neighbor(node("b"), 1, now);
    a.update_neighbor(node("d"), 1, now);

    for (origin, neighbors) in edges {
        if *origin == "a" {
            continue;
        }
        let decision = a.process_packet(&mut lsa(origin, 1, neighbors), None, now);
        assert_eq!(decision, Decision::FloodLsa, "lsa from {origin} must install");
    }

    // Direct neighbors are one hop; c is two hops away on either side, and
    // the tie resolves to the lexicographically smaller first hop.
    assert_eq!(a.routing_table().get(&node("b")), Some(&node("b")));
    assert_eq!(a.routing_table().get(&node("d")), Some(&node("d")));
    assert_eq!(a.routing_table().get(&node("c")), Some(&node("b")));
}

/// Two routers with identical LSDBs and neighbor states publish identical
/// tables, whatever order the advertisements arrived in.
#[test]
fn arrival_order_does_not_change_the_table() {
    let now = Instant::now();
    let advertisements: &[(&str, &[(&str, u32)])] = &[
        ("b", &[("a", 1), ("c", 1), ("e", 1)]),
        ("c", &[("b", 1), ("d", 1)]),
        ("d", &[("c", 1), ("e", 1)]),
        ("e", &[("b", 1), ("d", 1)]),
    ];

    let build = |order: &[usize]| {
        let mut state = LsrState::new(node("a"));
        state.update_neighbor(node("b"), 1, now);
        for &i in order {
            let (origin, neighbors) = advertisements[i];
            state.process_packet(&mut lsa(origin, 1, neighbors), None, now);
        }
        state.routing_table().clone()
    };

    let forward = build(&[0, 1, 2, 3]);
    let reversed = build(&[3, 2, 1, 0]);
    let shuffled = build(&[2, 0, 3, 1]);
    assert_eq!(forward, reversed);
    assert_eq!(forward, shuffled);

    // And everything funnels through the only direct neighbor.
    for destination in ["b", "c", "d", "e"] {
        assert_eq!(forward.get(&node(destination)), Some(&node("b")));
    }
}

/// Higher-cost links lose to longer-but-cheaper paths.
#[test]
fn costs_are_honored_over_hop_count() {
    let now = Instant::now();
    let mut state = LsrState::new(node("a"));
    state.update_neighbor(node("b"), 10, now);
    state.update_neighbor(node("c"), 1, now);

    state.process_packet(&mut lsa("b", 1, &[("a", 10)]), None, now);
    state.process_packet(&mut lsa("c", 1, &[("a", 1), ("b", 1)]), None, now);

    // Direct a-b costs 10; a-c-b costs 2.
    assert_eq!(state.routing_table().get(&node("b")), Some(&node("c")));
}
