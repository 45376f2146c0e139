//! Byte-stream transport shared by the fuzzer and the replay tool.
//!
//! Payloads are written verbatim; nothing here knows the target protocol.
//! Inbound data is only logged.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::info;

/// Size of the buffer used to drain inbound data.
const READ_BUF_SIZE: usize = 4096;

/// A host/port pair to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Open a TCP connection to the target.
    pub async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Render a payload for the log (base64, so it can be replayed).
#[must_use]
pub fn encode_payload(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

/// Decode a payload previously rendered by [`encode_payload`].
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(encoded.trim())
}

/// Why the peer side of a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer closed its side.
    Closed,
    /// Reading failed.
    Failed(String),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed by peer"),
            Self::Failed(e) => write!(f, "read failed: {e}"),
        }
    }
}

/// Wait for `delay` while logging anything the peer sends.
///
/// Returns early with the reason if the peer disconnects.
pub async fn pace<R>(reader: &mut R, delay: Duration, session: &str) -> Result<(), Disconnect>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Err(Disconnect::Closed),
                Ok(n) => {
                    info!(
                        session,
                        bytes = n,
                        payload = %encode_payload(&buf[..n]),
                        "Server -> Fuzzer"
                    );
                }
                Err(e) => return Err(Disconnect::Failed(e.to_string())),
            },
        }
    }
}
