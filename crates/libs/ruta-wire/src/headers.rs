//! Packet headers: message ids and the rolling path window.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::addr::NodeId;

/// Maximum number of recent forwarders kept in `headers.path`.
pub const PATH_WINDOW: usize = 3;

/// Generate a fresh 128-bit message id, hex-encoded.
pub fn fresh_msg_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Canonical header shape: a map with `msg_id`, `path` and whatever extra
/// keys the originator chose to attach (`ts`, `seq`, ...). Unknown keys are
/// preserved across forwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<NodeId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Wire representation of `headers`.
///
/// The map form is canonical. The list form is a legacy shape where the
/// whole header was just the path; it is accepted on decode and rewritten
/// into `{path: <list>, msg_id: <fresh>}` the first time it is mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Headers {
    Map(HeaderMap),
    List(Vec<NodeId>),
}

impl Default for Headers {
    fn default() -> Self {
        Self::Map(HeaderMap::default())
    }
}

impl Headers {
    pub fn msg_id(&self) -> Option<&str> {
        match self {
            Self::Map(map) => map.msg_id.as_deref(),
            Self::List(_) => None,
        }
    }

    /// The forwarder window. For legacy list headers the list itself is
    /// the path.
    pub fn path(&self) -> &[NodeId] {
        match self {
            Self::Map(map) => &map.path,
            Self::List(path) => path,
        }
    }

    /// Upgrade a legacy list into the canonical map form. No-op on maps.
    fn upgrade(&mut self) -> &mut HeaderMap {
        if let Self::List(path) = self {
            *self = Self::Map(HeaderMap {
                msg_id: Some(fresh_msg_id()),
                path: std::mem::take(path),
                extra: serde_json::Map::new(),
            });
        }
        match self {
            Self::Map(map) => map,
            Self::List(_) => unreachable!("headers upgraded above"),
        }
    }

    /// Set `msg_id` if absent, returning the id now present. Idempotent.
    pub fn ensure_msg_id(&mut self) -> &str {
        let map = self.upgrade();
        if map.msg_id.is_none() {
            map.msg_id = Some(fresh_msg_id());
        }
        match &map.msg_id {
            Some(id) => id,
            None => unreachable!("msg_id set above"),
        }
    }

    /// Record `hop` in the path window: drop the oldest entry once the
    /// window is full, then append.
    pub fn record_hop(&mut self, hop: NodeId) {
        let map = self.upgrade();
        if map.path.len() >= PATH_WINDOW {
            map.path.remove(0);
        }
        map.path.push(hop);
    }

    pub fn set_path(&mut self, path: Vec<NodeId>) {
        self.upgrade().path = path;
    }

    /// Attach an extra header key (`ts`, `seq`, ...).
    pub fn insert(&mut self, key: &str, value: Value) {
        self.upgrade().extra.insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(map) => map.extra.get(key),
            Self::List(_) => None,
        }
    }
}
