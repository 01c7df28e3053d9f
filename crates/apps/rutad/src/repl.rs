//! Line-oriented control surface on stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use ruta_wire::Destination;

use crate::engine::{Engine, EngineEvent};

enum Outcome {
    Continue,
    Quit,
}

/// Run the REPL until `quit`, end-of-input or cancellation. Inbound
/// message and echo-reply events are printed as they arrive.
pub async fn run(engine: Arc<Engine>, cancel: CancellationToken) {
    print_help(&engine);

    {
        let mut events = engine.events();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(EngineEvent::MessageReceived { from, payload }) => {
                            println!("\n[MESSAGE FROM {from}]: {}", render(&payload));
                        }
                        Ok(EngineEvent::EchoReply { from, payload }) => {
                            println!("\n[ECHO REPLY FROM {from}]: {}", render(&payload));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if matches!(handle_command(&engine, line.trim()).await, Outcome::Quit) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("repl: stdin error: {err}");
                    break;
                }
            }
        }
    }
}

fn print_help(engine: &Engine) {
    println!("Router {} ready. Commands:", engine.node());
    println!("  send <destination> <message> - Send message to destination");
    println!("  echo <destination>           - Send echo to destination");
    println!("  neighbors                    - Show neighbors");
    println!("  routes                       - Show routing table");
    println!("  topology                     - Show network topology");
    println!("  logs                         - Show packet logs");
    println!("  path <destination>           - Show path to destination (dijkstra only)");
    println!("  debug                        - Show routing algorithm state");
    println!("  lsr                          - Show detailed LSR state (lsr only)");
    println!("  quit                         - Exit router");
}

fn render(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

async fn handle_command(engine: &Arc<Engine>, line: &str) -> Outcome {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return Outcome::Continue;
    };

    match command {
        "send" if parts.len() >= 3 => {
            let destination = Destination::from(parts[1].to_owned());
            let body = parts[2..].join(" ");
            engine.send_message(destination, body).await;
        }
        "echo" if parts.len() >= 2 => {
            let destination = Destination::from(parts[1].to_owned());
            engine.send_echo(destination).await;
        }
        "neighbors" => {
            println!("Neighbors:");
            for (id, cost) in engine.neighbors() {
                println!("  {id}: cost={cost}");
            }
        }
        "routes" => {
            println!("Routing table:");
            let table = engine.with_algorithm(|a| a.routing_table()).await;
            if table.is_empty() {
                println!("  (empty)");
            }
            for (dest, next) in table {
                println!("  {dest} -> {next}");
            }
        }
        "topology" => {
            println!("Network topology:");
            for (id, neighbors) in engine.topology() {
                let marker = if id == engine.node() { " (this node)" } else { "" };
                let list: Vec<&str> = neighbors.iter().map(|n| n.as_str()).collect();
                println!("  {id}{marker}: {list:?}");
            }
        }
        "logs" => {
            println!("Recent packet logs:");
            for line in engine.packet_log_tail(10).await {
                println!("  {line}");
            }
        }
        "path" if parts.len() >= 2 => {
            let destination = ruta_wire::NodeId::from(parts[1]);
            let path = engine
                .with_algorithm(|a| a.as_dijkstra().map(|d| d.get_full_path(&destination)))
                .await;
            match path {
                Some(path) if !path.is_empty() => {
                    let rendered: Vec<&str> = path.iter().map(|n| n.as_str()).collect();
                    println!("Path to {destination}: {}", rendered.join(" -> "));
                }
                Some(_) => println!("No path to {destination}"),
                None => println!("Path command only available for the dijkstra algorithm"),
            }
        }
        "debug" => {
            let (name, table, neighbors) = engine
                .with_algorithm(|a| (a.name(), a.routing_table(), a.neighbors()))
                .await;
            println!("Routing algorithm debug info:");
            println!("  Algorithm: {name}");
            println!("  Routing table: {table:?}");
            println!("  Neighbors: {:?}", neighbors.keys().collect::<Vec<_>>());
        }
        "lsr" => {
            let summary = engine
                .with_algorithm(|a| {
                    a.as_lsr().map(|lsr| {
                        let neighbors: Vec<String> = lsr
                            .neighbor_states()
                            .iter()
                            .map(|(id, st)| {
                                format!("    {id}: alive={}, cost={}", st.alive, st.cost)
                            })
                            .collect();
                        let database: Vec<String> = lsr
                            .link_state_db()
                            .iter()
                            .map(|(origin, entry)| {
                                format!(
                                    "    {origin}: seq={}, neighbors={:?}",
                                    entry.seq,
                                    entry.neighbors.keys().collect::<Vec<_>>()
                                )
                            })
                            .collect();
                        let area: Vec<String> =
                            lsr.area_routers().iter().map(ToString::to_string).collect();
                        (neighbors, database, area, lsr.my_lsa_seq())
                    })
                })
                .await;
            match summary {
                Some((neighbors, database, area, seq)) => {
                    println!("LSR detailed debug:");
                    println!("  Neighbor states:");
                    for line in neighbors {
                        println!("{line}");
                    }
                    println!("  LSA database:");
                    for line in database {
                        println!("{line}");
                    }
                    println!("  Area routers: {area:?}");
                    println!("  My LSA sequence: {seq}");
                }
                None => println!("LSR command only available for the lsr algorithm"),
            }
        }
        "quit" => return Outcome::Quit,
        _ => println!("Unknown command"),
    }

    Outcome::Continue
}
