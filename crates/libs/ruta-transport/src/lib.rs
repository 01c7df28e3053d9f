//! # ruta-transport
//!
//! Transport fabric for the ruta daemon. The engine is transport-agnostic:
//! it holds one mpsc sender for outbound traffic and one receiver for
//! inbound traffic, and a transport backend bridges those channels to the
//! actual network. Two backends exist:
//!
//! - [`stream::StreamTransport`] — direct TCP links to each configured
//!   neighbor, one JSON packet per read.
//! - [`bus::BusTransport`] — a RESP (Redis-protocol) pub/sub broker with
//!   one channel per node.
//!
//! Inbound packets are tagged with the neighbor they arrived from whenever
//! the backend can tell; `None` means "could not attribute", and the
//! routing layer falls back to the packet's own `from` field.

pub mod bus;
pub mod error;
pub mod resp;
pub mod stream;

use ruta_wire::{NodeId, Packet};
use tokio::sync::mpsc;

pub use error::TransportError;

/// Queue depth for both directions of the engine/transport bridge.
pub const QUEUE_CAPACITY: usize = 128;

/// Fan-out selector for an outbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxKind {
    /// Deliver to exactly this neighbor.
    Direct(NodeId),
    /// Deliver to every neighbor, optionally skipping the one the packet
    /// was received from.
    Broadcast { exclude: Option<NodeId> },
}

/// An outbound packet with its fan-out selector.
#[derive(Debug, Clone)]
pub struct TxMessage {
    pub kind: TxKind,
    pub packet: Packet,
}

/// An inbound packet tagged with the neighbor it arrived from, when known.
#[derive(Debug, Clone)]
pub struct RxMessage {
    pub peer: Option<NodeId>,
    pub packet: Packet,
}

pub type TxSender = mpsc::Sender<TxMessage>;
pub type TxReceiver = mpsc::Receiver<TxMessage>;
pub type RxSender = mpsc::Sender<RxMessage>;
pub type RxReceiver = mpsc::Receiver<RxMessage>;

pub fn tx_channel() -> (TxSender, TxReceiver) {
    mpsc::channel(QUEUE_CAPACITY)
}

pub fn rx_channel() -> (RxSender, RxReceiver) {
    mpsc::channel(QUEUE_CAPACITY)
}
