//! The packet record and its JSON codec.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::addr::{Destination, NodeId};
use crate::headers::Headers;

/// Hop budget given to packets whose originator did not choose one.
pub const DEFAULT_TTL: u32 = 5;

/// Errors from packet codec operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed packet: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("packet encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Routing algorithm tag carried in every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Flooding,
    Dijkstra,
    Lsr,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flooding => f.write_str("flooding"),
            Self::Dijkstra => f.write_str("dijkstra"),
            Self::Lsr => f.write_str("lsr"),
        }
    }
}

/// Packet type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Message,
    Echo,
    EchoReply,
    Hello,
    Info,
    Lsa,
}

impl PacketKind {
    /// `info` and `lsa` are interchangeable aliases for a link-state
    /// advertisement; receivers must accept both.
    pub fn is_lsa(self) -> bool {
        matches!(self, Self::Info | Self::Lsa)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Echo => "echo",
            Self::EchoReply => "echo_reply",
            Self::Hello => "hello",
            Self::Info => "info",
            Self::Lsa => "lsa",
        };
        f.write_str(name)
    }
}

/// One routed packet. Immutable on the wire; forwarders only touch `ttl`
/// and the `headers.path` window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub proto: Proto,
    #[serde(rename = "type")]
    pub kind: PacketKind,
    pub from: NodeId,
    pub to: Destination,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default = "default_payload")]
    pub payload: Value,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

fn default_payload() -> Value {
    Value::String(String::new())
}

impl Packet {
    pub fn new(proto: Proto, kind: PacketKind, from: NodeId, to: impl Into<Destination>) -> Self {
        Self {
            proto,
            kind,
            from,
            to: to.into(),
            ttl: DEFAULT_TTL,
            headers: Headers::default(),
            payload: default_payload(),
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Decode one JSON object. Unknown keys are ignored; missing `ttl`,
    /// `headers` and `payload` take their defaults.
    pub fn from_json(raw: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(raw).map_err(WireError::Decode)
    }

    /// Spend one hop of budget. Returns whether the packet may still be
    /// forwarded (`ttl > 0` after the decrement).
    pub fn decrement_ttl(&mut self) -> bool {
        self.ttl = self.ttl.saturating_sub(1);
        self.ttl > 0
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.headers.msg_id()
    }

    /// Set a fresh `msg_id` if none is present; existing ids are preserved
    /// across forwards.
    pub fn ensure_msg_id(&mut self) -> &str {
        self.headers.ensure_msg_id()
    }

    pub fn path(&self) -> &[NodeId] {
        self.headers.path()
    }

    /// Append `hop` to the rolling path window.
    pub fn record_hop(&mut self, hop: NodeId) {
        self.headers.record_hop(hop);
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}->{} ttl={}", self.kind, self.from, self.to, self.ttl)
    }
}
