//! Line-oriented drainage of the transcoder's output pipes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::supervisor::StreamEvent;
use crate::transcoder::parse_progress_line;

/// Longest line forwarded; the rest of an over-long line is discarded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Which pipe a reader is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// Structured `key=value` statistics (stdout).
    Progress,
    /// Free-text warnings and errors (stderr).
    Diagnostic,
}

impl std::fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progress => f.write_str("progress"),
            Self::Diagnostic => f.write_str("diagnostic"),
        }
    }
}

/// Read `reader` line by line until EOF, a read error, or cancellation.
///
/// Progress lines are parsed and forwarded as metric updates; diagnostic
/// lines are forwarded verbatim, blank ones included. Lines longer than
/// `MAX_LINE_BYTES` are truncated. Once `cancel` fires the reader keeps
/// draining for at most `drain` so the tail of the output is not lost, then
/// gives up and releases the pipe. Invalid UTF-8 is replaced, not fatal.
pub async fn read_channel<R>(
    reader: R,
    channel: OutputChannel,
    tx: Sender<StreamEvent>,
    cancel: CancellationToken,
    drain: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut discarding = false;

    let shutdown = async {
        cancel.cancelled().await;
        tokio::time::sleep(drain).await;
    };
    tokio::pin!(shutdown);

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        let read = tokio::select! {
            read = limited.read_until(b'\n', &mut buf) => read,
            () = &mut shutdown => {
                tracing::debug!(%channel, "Reader cancelled");
                break;
            }
        };

        match read {
            Ok(0) => {
                tracing::debug!(%channel, "Output channel closed");
                break;
            }
            Ok(_) => {
                let complete = buf.last() == Some(&b'\n');
                if discarding {
                    discarding = !complete;
                    continue;
                }
                if !complete && buf.len() >= MAX_LINE_BYTES {
                    tracing::debug!(
                        %channel,
                        limit = MAX_LINE_BYTES,
                        "Truncating over-long output line"
                    );
                    discarding = true;
                }

                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                let event = match channel {
                    OutputChannel::Progress => match parse_progress_line(line) {
                        Some(update) => StreamEvent::Progress(update),
                        None => continue,
                    },
                    OutputChannel::Diagnostic => StreamEvent::Diagnostic(line.to_string()),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(%channel, error = %e, "Failed to read transcoder output");
                let _ = tx
                    .send(StreamEvent::ReadFailed {
                        channel,
                        error: e.to_string(),
                    })
                    .await;
                break;
            }
        }
    }
}
