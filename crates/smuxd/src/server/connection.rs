//! Per-connection I/O tasks.
//!
//! The control loop never reads or writes sockets. Each accepted
//! connection gets a reader task that forwards complete lines into the
//! loop's event channel and a writer task that serializes
//! [`DaemonMessage`]s back out. Closing the writer's channel makes the
//! writer flush whatever is queued (the exit notice, typically) and shut
//! its half of the socket, which is how the daemon says goodbye without
//! truncating the farewell.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use smux_core::ClientId;
use smux_protocol::DaemonMessage;

use crate::server::ServerEvent;

/// Maximum accepted line length (1 MB). Longer lines end the connection.
pub(crate) const MAX_LINE: usize = 1_048_576;

/// Spawns the reader and writer tasks for one connection.
///
/// Returns the writer channel and the reader's cancellation token; both
/// end up in the [`Client`](crate::state::Client) record.
pub fn spawn(
    stream: UnixStream,
    id: ClientId,
    events: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) -> (mpsc::UnboundedSender<DaemonMessage>, CancellationToken) {
    let (read_half, write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<DaemonMessage>();

    tokio::spawn(async move {
        let mut writer = BufWriter::new(write_half);
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    warn!(client = %id, error = %err, "failed to serialize message");
                    continue;
                }
            };
            let result = async {
                writer.write_all(json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
                Ok::<(), std::io::Error>(())
            }
            .await;
            if let Err(err) = result {
                debug!(client = %id, error = %err, "write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let reader_cancel = cancel.clone();
    tokio::spawn(async move {
        // The limit is re-armed per line. A line that exhausts it hits
        // the cap while still buffering, so an endless newline-free
        // stream is cut off at MAX_LINE, not accumulated.
        let mut reader = BufReader::new(read_half).take(MAX_LINE as u64 + 1);
        let mut line = String::new();
        loop {
            line.clear();
            reader.set_limit(MAX_LINE as u64 + 1);
            let read = tokio::select! {
                _ = reader_cancel.cancelled() => break,
                read = reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => break,
                Ok(n) if n > MAX_LINE => {
                    warn!(client = %id, bytes = n, "oversized line, closing");
                    break;
                }
                Ok(_) => {
                    let event = ServerEvent::ClientLine {
                        client: id,
                        line: line.trim_end_matches('\n').to_string(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(client = %id, error = %err, "read failed");
                    break;
                }
            }
        }
        let _ = events.send(ServerEvent::ClientGone(id));
    });

    (out_tx, cancel)
}
