//! Node identifiers and packet destinations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one router in the network.
///
/// Ids are short opaque strings taken from the topology file. The derived
/// `Ord` (lexicographic) is the deterministic order used by every tie-break
/// in the routing code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The `to` field of a packet: a concrete node or one of the reserved
/// group addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    Node(NodeId),
    Broadcast,
    Multicast,
}

impl Destination {
    /// Broadcast and multicast packets take the group path through the
    /// engine; everything else is unicast.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Broadcast | Self::Multicast)
    }

    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::Node(id) => Some(id),
            _ => None,
        }
    }
}

impl From<String> for Destination {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "broadcast" => Self::Broadcast,
            "multicast" => Self::Multicast,
            _ => Self::Node(NodeId(raw)),
        }
    }
}

impl From<Destination> for String {
    fn from(dest: Destination) -> Self {
        match dest {
            Destination::Node(id) => id.0,
            Destination::Broadcast => "broadcast".to_owned(),
            Destination::Multicast => "multicast".to_owned(),
        }
    }
}

impl From<NodeId> for Destination {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => f.write_str(id.as_str()),
            Self::Broadcast => f.write_str("broadcast"),
            Self::Multicast => f.write_str("multicast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parses_reserved_names() {
        assert_eq!(Destination::from("broadcast".to_owned()), Destination::Broadcast);
        assert_eq!(Destination::from("multicast".to_owned()), Destination::Multicast);
        assert_eq!(
            Destination::from("r7".to_owned()),
            Destination::Node(NodeId::from("r7"))
        );
    }

    #[test]
    fn destination_roundtrips_through_json() {
        let dest: Destination = serde_json::from_str("\"broadcast\"").expect("decode");
        assert!(dest.is_group());
        assert_eq!(serde_json::to_string(&dest).expect("encode"), "\"broadcast\"");

        let dest: Destination = serde_json::from_str("\"b\"").expect("decode");
        assert_eq!(dest.node(), Some(&NodeId::from("b")));
    }

    #[test]
    fn node_ids_order_lexicographically() {
        let mut ids = vec![NodeId::from("c"), NodeId::from("a"), NodeId::from("b")];
        ids.sort();
        assert_eq!(ids, vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]);
    }
}
