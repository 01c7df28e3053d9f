//! Topology and names files.
//!
//! Both are JSON with a `type` tag. The topology file lists each node's
//! direct neighbors (undirected, cost 1); the names file maps node ids to
//! transport addresses — `host`/`port` per node for stream mode, a broker
//! endpoint plus one `channel` per node for pub/sub mode.

use std::collections::BTreeMap;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use ruta_wire::NodeId;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_BROKER_PORT: u16 = 6379;

/// Startup configuration failures. All of them are fatal: the daemon
/// prints the message to stderr and exits with status 1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is not a {expected:?} file (found type {found:?})")]
    WrongType {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("router id {id:?} not present in the names file")]
    UnknownNode { id: NodeId },

    #[error("names entry for {id:?} has no usable {field}")]
    IncompleteEntry { id: NodeId, field: &'static str },

    #[error("could not resolve {host}:{port} for {id:?}")]
    Unresolvable { id: NodeId, host: String, port: u16 },
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// `{"type": "topo", "config": {"a": ["b", "c"], ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyFile {
    #[serde(rename = "type")]
    kind: String,
    pub config: BTreeMap<NodeId, Vec<NodeId>>,
}

impl TopologyFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: Self = read_json(path)?;
        if file.kind != "topo" {
            return Err(ConfigError::WrongType {
                path: path.to_owned(),
                expected: "topo",
                found: file.kind,
            });
        }
        Ok(file)
    }

    pub fn neighbors_of(&self, id: &NodeId) -> &[NodeId] {
        self.config.get(id).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameEntry {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub channel: Option<String>,
}

/// `{"type": "names", ...}` — per-node addresses, plus broker coordinates
/// at the top level in pub/sub mode.
#[derive(Debug, Clone, Deserialize)]
pub struct NamesFile {
    #[serde(rename = "type")]
    kind: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pwd: Option<String>,
    pub config: BTreeMap<NodeId, NameEntry>,
}

impl NamesFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: Self = read_json(path)?;
        if file.kind != "names" {
            return Err(ConfigError::WrongType {
                path: path.to_owned(),
                expected: "names",
                found: file.kind,
            });
        }
        Ok(file)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.config.contains_key(id)
    }

    /// Resolve a node's stream address. `host` defaults to localhost.
    pub fn socket_addr_of(&self, id: &NodeId) -> Result<SocketAddr, ConfigError> {
        let entry = self
            .config
            .get(id)
            .ok_or_else(|| ConfigError::UnknownNode { id: id.clone() })?;
        let port = entry.port.ok_or_else(|| ConfigError::IncompleteEntry {
            id: id.clone(),
            field: "port",
        })?;
        let host = entry.host.clone().unwrap_or_else(|| "localhost".to_owned());
        (host.as_str(), port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ConfigError::Unresolvable {
                id: id.clone(),
                host,
                port,
            })
    }

    pub fn channel_of(&self, id: &NodeId) -> Result<String, ConfigError> {
        let entry = self
            .config
            .get(id)
            .ok_or_else(|| ConfigError::UnknownNode { id: id.clone() })?;
        entry
            .channel
            .clone()
            .ok_or_else(|| ConfigError::IncompleteEntry {
                id: id.clone(),
                field: "channel",
            })
    }

    /// Broker endpoint for pub/sub mode, with the conventional defaults.
    pub fn broker_endpoint(&self) -> String {
        let host = self.host.as_deref().unwrap_or(DEFAULT_BROKER_HOST);
        let port = self.port.unwrap_or(DEFAULT_BROKER_PORT);
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn topology_loads_and_lists_neighbors() {
        let file = write_temp(r#"{"type":"topo","config":{"a":["b","c"],"b":["a"],"c":["a"]}}"#);
        let topo = TopologyFile::load(file.path()).expect("load topo");
        assert_eq!(
            topo.neighbors_of(&NodeId::from("a")),
            [NodeId::from("b"), NodeId::from("c")]
        );
        assert!(topo.neighbors_of(&NodeId::from("zz")).is_empty());
    }

    #[test]
    fn wrong_type_tag_is_rejected() {
        let file = write_temp(r#"{"type":"names","config":{}}"#);
        assert!(matches!(
            TopologyFile::load(file.path()),
            Err(ConfigError::WrongType { .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let file = write_temp("{oops");
        assert!(matches!(
            NamesFile::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn stream_names_resolve_addresses() {
        let file = write_temp(
            r#"{"type":"names","config":{"a":{"host":"127.0.0.1","port":9001},"b":{"port":9002}}}"#,
        );
        let names = NamesFile::load(file.path()).expect("load names");
        let addr = names.socket_addr_of(&NodeId::from("a")).expect("resolve a");
        assert_eq!(addr.port(), 9001);
        // host defaults to localhost
        assert!(names.socket_addr_of(&NodeId::from("b")).is_ok());
        assert!(matches!(
            names.socket_addr_of(&NodeId::from("zz")),
            Err(ConfigError::UnknownNode { .. })
        ));
    }

    #[test]
    fn pubsub_names_carry_broker_and_channels() {
        let file = write_temp(
            r#"{"type":"names","host":"broker.lan","port":6380,"pwd":"s3cret",
                "config":{"a":{"channel":"ch.a"},"b":{"channel":"ch.b"}}}"#,
        );
        let names = NamesFile::load(file.path()).expect("load names");
        assert_eq!(names.broker_endpoint(), "broker.lan:6380");
        assert_eq!(names.pwd.as_deref(), Some("s3cret"));
        assert_eq!(names.channel_of(&NodeId::from("a")).expect("channel"), "ch.a");
    }

    #[test]
    fn missing_channel_is_an_incomplete_entry() {
        let file = write_temp(r#"{"type":"names","config":{"a":{"port":1}}}"#);
        let names = NamesFile::load(file.path()).expect("load names");
        assert!(matches!(
            names.channel_of(&NodeId::from("a")),
            Err(ConfigError::IncompleteEntry { field: "channel", .. })
        ));
    }
}
