use std::time::Duration;

/// Transport-level failures. None of these are fatal to the router: sends
/// are abandoned per-peer and stream links are retried on the reconnect
/// tick.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("frame of {0} bytes exceeds the wire limit")]
    Oversize(usize),

    #[error("broker refused {command}: {reply}")]
    BrokerRefused { command: String, reply: String },

    #[error("malformed broker reply: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,
}
