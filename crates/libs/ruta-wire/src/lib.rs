//! # ruta-wire
//!
//! Packet model and JSON wire codec for the ruta routing daemon.
//!
//! Every packet that crosses a link is one JSON object:
//!
//! ```text
//! { "proto": "flooding"|"dijkstra"|"lsr",
//!   "type":  "message"|"echo"|"echo_reply"|"hello"|"info"|"lsa",
//!   "from":  "<node-id>", "to": "<node-id>"|"broadcast"|"multicast",
//!   "ttl":   <int>,
//!   "headers": { "msg_id": "<hex>", "path": ["<id>", ...], ... },
//!   "payload": <string or JSON> }
//! ```
//!
//! `headers.msg_id` is a 128-bit hex identifier used network-wide for
//! duplicate suppression; `headers.path` is a rolling three-entry window of
//! recent forwarders used as a cheap cycle guard. Peers running older
//! firmware emit `headers` as a bare list of node ids (the path); decoding
//! accepts both shapes and the list form is upgraded to the map form on
//! first mutation.

pub mod addr;
pub mod headers;
pub mod packet;

pub use addr::{Destination, NodeId};
pub use headers::{fresh_msg_id, HeaderMap, Headers, PATH_WINDOW};
pub use packet::{Packet, PacketKind, Proto, WireError, DEFAULT_TTL};
