//! Signal dispatch.
//!
//! Signal handlers never touch server state. A dedicated task turns each
//! delivery into a [`ServerEvent`] on the control loop's channel, so all
//! reactions run on the loop's own pass, serialized with everything else.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::server::ServerEvent;

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSignal {
    /// SIGINT: start the shutdown sequence.
    Interrupt,
    /// SIGTERM: start the shutdown sequence.
    Terminate,
    /// SIGCHLD: reap children.
    Child,
    /// SIGUSR1: recreate the listening socket.
    RotateSocket,
    /// SIGUSR2: toggle verbose logging.
    ToggleLogging,
}

/// Installs handlers and spawns the forwarding task.
///
/// Installation happens before spawning so a failure surfaces to the
/// caller instead of being lost inside the task.
pub fn spawn_listener(
    events: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) -> io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut child = signal(SignalKind::child())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interrupt.recv() => ServerSignal::Interrupt,
                _ = terminate.recv() => ServerSignal::Terminate,
                _ = child.recv() => ServerSignal::Child,
                _ = usr1.recv() => ServerSignal::RotateSocket,
                _ = usr2.recv() => ServerSignal::ToggleLogging,
            };
            debug!(signal = ?sig, "signal received");
            if events.send(ServerEvent::Signal(sig)).is_err() {
                break;
            }
        }
    }))
}
