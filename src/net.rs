//! Newline-delimited JSON over TCP.
//!
//! Servers keep a connection open and answer every line with exactly one
//! line; clients open one connection per exchange. A line that is not
//! UTF-8 or longer than [`MAX_LINE_BYTES`] gets a `PROTOCOL` error line and
//! the connection keeps going.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use crate::protocol::{self, ErrorKind};

/// Longest request line a server accepts, line terminator excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("cannot connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("{addr} did not answer within {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("i/o error talking to {addr}: {source}")]
    Io { addr: String, source: io::Error },

    #[error("{addr} closed the connection without replying")]
    Closed { addr: String },

    #[error("undecodable reply from {addr}: {source}")]
    Decode {
        addr: String,
        source: serde_json::Error,
    },
}

impl NetError {
    /// A peer that answered garbage is reachable but broken.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::Decode { .. } => ErrorKind::Protocol,
            _ => ErrorKind::Unreachable,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.kind() == ErrorKind::Unreachable
    }
}

/// Accept connections forever, answering each request line with
/// `handler(line)`. Blank lines are ignored.
pub async fn serve<H, F>(listener: TcpListener, handler: H) -> io::Result<()>
where
    H: Fn(String) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = String> + Send + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(reason = %e, "accept failed");
                continue;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move {
            debug!(%peer, "connection opened");
            if let Err(e) = connection(stream, handler).await {
                debug!(%peer, reason = %e, "connection dropped");
            }
            debug!(%peer, "connection closed");
        });
    }
}

async fn connection<H, F>(stream: TcpStream, handler: H) -> io::Result<()>
where
    H: Fn(String) -> F,
    F: Future<Output = String>,
{
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 2)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(());
        }

        let line = strip_terminator(&buf);
        let mut reply = if line.len() > MAX_LINE_BYTES {
            if buf.last() != Some(&b'\n') {
                skip_line(&mut reader).await?;
            }
            warn!(limit = MAX_LINE_BYTES, "request line too long");
            protocol::error_line(
                ErrorKind::Protocol,
                format!("request line exceeds {MAX_LINE_BYTES} bytes"),
            )
        } else {
            match std::str::from_utf8(line) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => handler(line.to_string()).await,
                Err(e) => {
                    warn!(reason = %e, "request line is not UTF-8");
                    protocol::error_line(ErrorKind::Protocol, format!("request is not UTF-8: {e}"))
                }
            }
        };
        reply.push('\n');
        write_half.write_all(reply.as_bytes()).await?;
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Discard input up to and including the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => (true, end + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

/// Send one request line to `addr` and decode the single reply line.
pub async fn exchange<Req, Res>(
    addr: &str,
    request: &Req,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Res, NetError>
where
    Req: Serialize,
    Res: DeserializeOwned,
{
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| NetError::Timeout {
            addr: addr.to_string(),
            after: connect_timeout,
        })?
        .map_err(|source| NetError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    let line = timeout(request_timeout, round_trip(stream, protocol::encode(request)))
        .await
        .map_err(|_| NetError::Timeout {
            addr: addr.to_string(),
            after: request_timeout,
        })?
        .map_err(|source| NetError::Io {
            addr: addr.to_string(),
            source,
        })?
        .ok_or_else(|| NetError::Closed {
            addr: addr.to_string(),
        })?;

    serde_json::from_str(&line).map_err(|source| NetError::Decode {
        addr: addr.to_string(),
        source,
    })
}

async fn round_trip(stream: TcpStream, mut line: String) -> io::Result<Option<String>> {
    let (read_half, mut write_half) = stream.into_split();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    let mut lines = LinesStream::new(BufReader::new(read_half).lines());
    lines.next().await.transpose()
}
