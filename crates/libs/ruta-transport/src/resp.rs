//! Minimal RESP2 codec — just enough of the Redis serialization protocol
//! for AUTH / SUBSCRIBE / PUBLISH and the push messages a subscriber
//! receives. Commands go out as arrays of bulk strings; replies come back
//! as one of the five RESP2 types.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::TransportError;

/// Upper bound on a single bulk string; anything larger is treated as a
/// protocol violation rather than buffered.
const MAX_BULK_LEN: i64 = 1024 * 1024;

/// One decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string (`$-1`).
    Bulk(Option<Vec<u8>>),
    /// `None` is the null array (`*-1`).
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(Some(data)) => Some(data.as_slice()),
            _ => None,
        }
    }
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one reply off the wire. Arrays recurse, so the future is boxed.
pub fn read_reply<'a, R>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = Result<Reply, TransportError>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let Some((kind, rest)) = split_first(&line) else {
            return Err(TransportError::Protocol("empty reply line".to_owned()));
        };

        match kind {
            b'+' => Ok(Reply::Simple(rest.to_owned())),
            b'-' => Ok(Reply::Error(rest.to_owned())),
            b':' => Ok(Reply::Integer(parse_int(rest)?)),
            b'$' => {
                let len = parse_int(rest)?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                if len > MAX_BULK_LEN {
                    return Err(TransportError::Protocol(format!("bulk of {len} bytes")));
                }
                let mut data = vec![0u8; len as usize + 2];
                reader.read_exact(&mut data).await?;
                data.truncate(len as usize);
                Ok(Reply::Bulk(Some(data)))
            }
            b'*' => {
                let len = parse_int(rest)?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply(reader).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(TransportError::Protocol(format!(
                "unknown reply type 0x{other:02x}"
            ))),
        }
    })
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, TransportError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(TransportError::Closed);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

fn split_first(line: &str) -> Option<(u8, &str)> {
    let first = *line.as_bytes().first()?;
    Some((first, &line[1..]))
}

fn parse_int(text: &str) -> Result<i64, TransportError> {
    text.parse()
        .map_err(|_| TransportError::Protocol(format!("bad integer {text:?}")))
}
