//! Replay of a recorded session.
//!
//! Sends a fixed list of payloads (base64, as they appear in the fuzzer's
//! `Fuzzer -> Server` log lines) over one connection, then disconnects.
//! Used to reproduce a failure seen during a fuzz run.

use crate::transport::{self, Disconnect, Target};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Errors from a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("payload {index} is not valid base64: {source}")]
    Decode {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to read payload file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("nothing to replay")]
    Empty,

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: Target,
        #[source]
        source: std::io::Error,
    },

    #[error("connection lost after {sent} payloads: {reason}")]
    Lost { sent: usize, reason: String },
}

/// Decode base64 payloads, rejecting the whole list on the first bad one.
pub fn decode_all<S: AsRef<str>>(encoded: &[S]) -> Result<Vec<Vec<u8>>, ReplayError> {
    if encoded.is_empty() {
        return Err(ReplayError::Empty);
    }
    encoded
        .iter()
        .enumerate()
        .map(|(index, e)| {
            transport::decode_payload(e.as_ref())
                .map_err(|source| ReplayError::Decode { index, source })
        })
        .collect()
}

/// Read one base64 payload per non-blank line.
pub fn read_payload_file(path: &Path) -> Result<Vec<String>, ReplayError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReplayError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Send `payloads` in order, pausing `delay` after each, then close.
pub async fn replay(target: &Target, payloads: &[Vec<u8>], delay: Duration) -> Result<(), ReplayError> {
    info!(addr = %target, payloads = payloads.len(), "Starting repro run");

    let stream = target
        .connect()
        .await
        .map_err(|source| ReplayError::Connect {
            target: target.clone(),
            source,
        })?;
    let (mut reader, mut writer) = tokio::io::split(stream);
    info!(addr = %target, "Connected to server");

    for (sent, payload) in payloads.iter().enumerate() {
        info!(payload = %transport::encode_payload(payload), "Fuzzer -> Server");
        writer.write_all(payload).await.map_err(|e| ReplayError::Lost {
            sent,
            reason: Disconnect::Failed(e.to_string()).to_string(),
        })?;
        transport::pace(&mut reader, delay, "replay")
            .await
            .map_err(|reason| ReplayError::Lost {
                sent: sent + 1,
                reason: reason.to_string(),
            })?;
    }

    info!("End of session, initiating disconnect");
    writer.shutdown().await.ok();
    info!(addr = %target, "Stopped repro run");
    Ok(())
}
