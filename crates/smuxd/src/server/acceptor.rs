//! Connection acceptor.
//!
//! Accept failures fall into three classes: transient (retry at once),
//! descriptor exhaustion (pause accepting for a fixed interval so the
//! daemon rides out the pressure instead of spinning), and everything
//! else (fatal - the listening socket is broken and the server cannot
//! continue). The acceptor also takes a replacement listener when the
//! socket is rotated on SIGUSR1.

use std::io;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::ServerEvent;

/// How long to stop accepting after running out of descriptors.
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// What to do about one failed accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptDisposition {
    /// Transient; try again immediately.
    Continue,
    /// Out of descriptors; pause accepting.
    Backoff,
    /// The listener is broken; terminate the server.
    Fatal,
}

/// Classifies an accept error.
pub fn classify_accept_error(err: &io::Error) -> AcceptDisposition {
    let Some(errno) = err.raw_os_error() else {
        return AcceptDisposition::Fatal;
    };
    if errno == libc::EAGAIN || errno == libc::EINTR || errno == libc::ECONNABORTED {
        AcceptDisposition::Continue
    } else if errno == libc::ENFILE || errno == libc::EMFILE {
        AcceptDisposition::Backoff
    } else {
        AcceptDisposition::Fatal
    }
}

/// Control messages for the acceptor task.
#[derive(Debug)]
pub enum AcceptorCtl {
    /// Swap in a freshly created listener (socket rotation).
    Replace(UnixListener),
}

/// Whether the accept loop keeps going after one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Stop,
}

/// Handles one failed accept: retries transient errors at once, sits out
/// the full backoff window on descriptor exhaustion, and reports fatal
/// errors to the control loop. No accept happens until this returns.
async fn handle_accept_failure(
    err: io::Error,
    events: &mpsc::UnboundedSender<ServerEvent>,
    cancel: &CancellationToken,
) -> LoopAction {
    match classify_accept_error(&err) {
        AcceptDisposition::Continue => {
            debug!(error = %err, "transient accept failure");
            LoopAction::Continue
        }
        AcceptDisposition::Backoff => {
            warn!(error = %err, "out of descriptors, pausing accept");
            tokio::select! {
                _ = cancel.cancelled() => LoopAction::Stop,
                _ = sleep(ACCEPT_BACKOFF) => LoopAction::Continue,
            }
        }
        AcceptDisposition::Fatal => {
            let _ = events.send(ServerEvent::AcceptFailed(err));
            LoopAction::Stop
        }
    }
}

/// Spawns the accept task.
pub fn spawn(
    mut listener: UnixListener,
    events: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) -> (mpsc::UnboundedSender<AcceptorCtl>, JoinHandle<()>) {
    let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ctl = ctl_rx.recv() => match ctl {
                    Some(AcceptorCtl::Replace(new_listener)) => {
                        listener = new_listener;
                        info!("accepting on replacement socket");
                    }
                    None => break,
                },
                result = listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        if events.send(ServerEvent::Connection(stream)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        if handle_accept_failure(err, &events, &cancel).await == LoopAction::Stop {
                            break;
                        }
                    }
                },
            }
        }
        debug!("acceptor stopped");
    });

    (ctl_tx, task)
}
