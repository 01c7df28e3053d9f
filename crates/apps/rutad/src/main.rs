use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use ruta_routing::{Algorithm, DijkstraState, FloodingState, LsrState};
use ruta_transport::bus::{BusConfig, BusTransport};
use ruta_transport::stream::{StreamConfig, StreamTransport};
use ruta_transport::{rx_channel, tx_channel, TransportError};
use ruta_wire::NodeId;

use rutad::config::{ConfigError, NamesFile, TopologyFile};
use rutad::engine::Engine;
use rutad::repl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AlgorithmKind {
    Flooding,
    Dijkstra,
    Lsr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Socket,
    Redis,
}

#[derive(Parser, Debug)]
#[command(name = "rutad", about = "Distributed routing daemon")]
struct Args {
    /// This router's node id.
    #[arg(long)]
    id: String,
    #[arg(long, value_enum)]
    algorithm: AlgorithmKind,
    /// Topology file (JSON, type "topo").
    #[arg(long)]
    topo: PathBuf,
    /// Names file (JSON, type "names").
    #[arg(long)]
    names: PathBuf,
    #[arg(long, value_enum, default_value_t = Mode::Redis)]
    mode: Mode,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport startup failed: {0}")]
    Transport(#[from] TransportError),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("configuration error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let topology = TopologyFile::load(&args.topo)?;
    let names = NamesFile::load(&args.names)?;
    let node = NodeId::from(args.id.as_str());

    if !names.contains(&node) {
        return Err(ConfigError::UnknownNode { id: node }.into());
    }

    let neighbor_ids: Vec<NodeId> = topology.neighbors_of(&node).to_vec();

    let mut algorithm = match args.algorithm {
        AlgorithmKind::Flooding => Algorithm::Flooding(FloodingState::new(node.clone())),
        AlgorithmKind::Dijkstra => {
            Algorithm::Dijkstra(DijkstraState::new(node.clone(), topology.config.clone()))
        }
        AlgorithmKind::Lsr => Algorithm::Lsr(LsrState::new(node.clone())),
    };

    let now = Instant::now();
    let mut neighbors: BTreeMap<NodeId, u32> = BTreeMap::new();
    for id in &neighbor_ids {
        algorithm.update_neighbor(id.clone(), 1, now);
        neighbors.insert(id.clone(), 1);
    }
    log::info!(
        "rutad: node {} running {} with neighbors {:?}",
        node,
        algorithm.name(),
        neighbor_ids.iter().map(NodeId::as_str).collect::<Vec<_>>()
    );

    let cancel = CancellationToken::new();
    let (tx_send, tx_recv) = tx_channel();
    let (rx_send, rx_recv) = rx_channel();

    match args.mode {
        Mode::Socket => {
            let listen = names.socket_addr_of(&node)?;
            let mut peers: BTreeMap<NodeId, SocketAddr> = BTreeMap::new();
            for id in &neighbor_ids {
                match names.socket_addr_of(id) {
                    Ok(addr) => {
                        peers.insert(id.clone(), addr);
                    }
                    Err(err) => log::warn!("rutad: skipping neighbor {id}: {err}"),
                }
            }
            StreamTransport::spawn(
                StreamConfig {
                    node: node.clone(),
                    listen,
                    peers,
                },
                rx_send,
                tx_recv,
                cancel.clone(),
            )
            .await?;
        }
        Mode::Redis => {
            let own_channel = names.channel_of(&node)?;
            let mut peer_channels: BTreeMap<NodeId, String> = BTreeMap::new();
            for id in &neighbor_ids {
                match names.channel_of(id) {
                    Ok(channel) => {
                        peer_channels.insert(id.clone(), channel);
                    }
                    Err(err) => log::warn!("rutad: skipping neighbor {id}: {err}"),
                }
            }
            BusTransport::spawn(
                BusConfig {
                    node: node.clone(),
                    broker: names.broker_endpoint(),
                    password: names.pwd.clone(),
                    own_channel,
                    peer_channels,
                    subscribe_peers: args.algorithm != AlgorithmKind::Dijkstra,
                },
                rx_send,
                tx_recv,
                cancel.clone(),
            )
            .await?;
        }
    }

    let engine = Engine::new(
        node,
        algorithm,
        topology.config,
        neighbors,
        tx_send,
        cancel.clone(),
    );
    engine.spawn(rx_recv);

    tokio::select! {
        () = repl::run(engine.clone(), cancel.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("rutad: interrupted, shutting down");
        }
    }

    // Grace period for in-flight tasks to observe the cancellation.
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
