//! The server control loop.
//!
//! One task owns all mutable state. The acceptor, the signal listener,
//! and every connection reader run as separate tasks, but they only feed
//! [`ServerEvent`]s into one channel; nothing mutates registries from
//! outside the loop. Each pass handles the events that are ready, then
//! runs the fixed tail: refresh the clock, run deferred project frees,
//! drain the command queues to quiescence, flush client exits, update the
//! socket mode, and evaluate the exit conditions.
//!
//! Suspension happens only at the channel receive between passes, so all
//! logic within a pass runs to completion without interleaving - the same
//! exclusion the single-threaded original relied on, without threads to
//! fight over.

mod acceptor;
mod connection;

pub use acceptor::{classify_accept_error, AcceptDisposition, AcceptorCtl, ACCEPT_BACKOFF};

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use smux_core::{ClientId, ServerOptions};
use smux_protocol::{
    parse_command_line, ClientMessage, Command, DaemonMessage, MessageType, ProtocolVersion,
};

use crate::acl::Acl;
use crate::cmdq;
use crate::history;
use crate::lifecycle;
use crate::logging::LogControl;
use crate::reaper;
use crate::signals::{self, ServerSignal};
use crate::state::{Client, ServerState};

/// Events the control loop reacts to.
#[derive(Debug)]
pub enum ServerEvent {
    /// The acceptor produced a connection.
    Connection(tokio::net::UnixStream),
    /// The acceptor hit an unrecoverable error.
    AcceptFailed(io::Error),
    /// A signal was delivered.
    Signal(ServerSignal),
    /// A connection reader produced one line.
    ClientLine { client: ClientId, line: String },
    /// A connection closed.
    ClientGone(ClientId),
    /// No payload; forces another pass so deferred work runs.
    Wakeup,
}

/// Unrecoverable server errors. Everything recoverable is resolved where
/// it happens; only these terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to set up socket at {path}: {source}")]
    SocketSetup { path: PathBuf, source: io::Error },

    #[error("failed to install signal handlers: {0}")]
    SignalSetup(io::Error),

    #[error("accept failed: {0}")]
    Accept(io::Error),

    #[error("waitpid failed: {0}")]
    Reap(io::Error),

    #[error("event channel closed")]
    ChannelClosed,
}

/// The default socket path: `<tmpdir>/smux-<uid>/default`.
pub fn default_socket_path() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    std::env::temp_dir()
        .join(format!("smux-{uid}"))
        .join("default")
}

/// The daemon server.
pub struct Server {
    state: ServerState,
    socket_path: PathBuf,
    default_socket: bool,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    acceptor_ctl: Option<mpsc::UnboundedSender<AcceptorCtl>>,
    cancel: CancellationToken,
    acl: Acl,
    last_attached: Option<bool>,
    log_control: Option<LogControl>,
}

impl Server {
    /// Creates a server for the given socket path. Nothing is bound until
    /// [`Server::run`].
    pub fn new(socket_path: impl Into<PathBuf>, options: ServerOptions) -> Self {
        let socket_path = socket_path.into();
        let default_socket = socket_path == default_socket_path();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let uid = unsafe { libc::getuid() };
        Self {
            state: ServerState::new(options),
            socket_path,
            default_socket,
            events_tx,
            events_rx,
            acceptor_ctl: None,
            cancel: CancellationToken::new(),
            acl: Acl::new(uid),
            last_attached: None,
            log_control: None,
        }
    }

    /// Attaches the log filter toggle driven by SIGUSR2.
    pub fn with_log_control(mut self, log_control: LogControl) -> Self {
        self.log_control = Some(log_control);
        self
    }

    /// The socket path this server (will) listen on.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, spawns the auxiliary tasks, and runs the control
    /// loop until the exit conditions converge.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let listener = create_socket(&self.socket_path, self.default_socket).map_err(|source| {
            ServerError::SocketSetup {
                path: self.socket_path.clone(),
                source,
            }
        })?;
        info!(socket = %self.socket_path.display(), "server listening");

        let (ctl, _accept_task) =
            acceptor::spawn(listener, self.events_tx.clone(), self.cancel.child_token());
        self.acceptor_ctl = Some(ctl);

        signals::spawn_listener(self.events_tx.clone(), self.cancel.child_token())
            .map_err(ServerError::SignalSetup)?;

        let result = self.event_loop().await;

        // Final cleanup: stop the auxiliary tasks, kill remaining jobs,
        // persist history, remove the socket.
        self.cancel.cancel();
        self.state.jobs.kill_all();
        history::save(&self.state);
        if let Err(err) = fs::remove_file(&self.socket_path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(error = %err, "failed to remove socket");
            }
        }
        info!("server exited");
        result
    }

    async fn event_loop(&mut self) -> Result<(), ServerError> {
        loop {
            let Some(event) = self.events_rx.recv().await else {
                return Err(ServerError::ChannelClosed);
            };

            // One pass: a shared clock, deferred frees from the previous
            // pass, then every ready event.
            self.state.current_time = Utc::now();
            lifecycle::run_pending_finalize(&mut self.state);

            self.handle_event(event)?;
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event)?;
            }

            cmdq::drain_queues(&mut self.state);
            self.service_clients();
            self.update_socket();

            if self.check_exit() {
                return Ok(());
            }
            if !self.state.pending_finalize.is_empty() {
                // Deferred frees need a next pass even if no I/O arrives.
                let _ = self.events_tx.send(ServerEvent::Wakeup);
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) -> Result<(), ServerError> {
        match event {
            ServerEvent::Connection(stream) => self.accept_client(stream),
            ServerEvent::AcceptFailed(err) => return Err(ServerError::Accept(err)),
            ServerEvent::Signal(sig) => self.handle_signal(sig)?,
            ServerEvent::ClientLine { client, line } => self.client_line(client, line),
            ServerEvent::ClientGone(client) => self.client_gone(client),
            ServerEvent::Wakeup => {}
        }
        Ok(())
    }

    fn accept_client(&mut self, stream: tokio::net::UnixStream) {
        if self.state.exiting {
            debug!("refusing connection during shutdown");
            drop(stream);
            return;
        }

        let peer_uid = stream.peer_cred().map(|cred| cred.uid());
        let id = self.state.next_client_id();
        let (writer, cancel) = connection::spawn(
            stream,
            id,
            self.events_tx.clone(),
            self.cancel.child_token(),
        );

        let mut client = Client::new(id, Some(writer), cancel);
        match peer_uid {
            Ok(uid) if self.acl.is_allowed(uid) => {
                debug!(client = %id, uid, "new client");
            }
            Ok(uid) => {
                warn!(client = %id, uid, "access denied");
                client.mark_exit(Some("access not allowed".to_string()));
            }
            Err(err) => {
                warn!(client = %id, error = %err, "peer credentials unavailable");
                client.mark_exit(Some("access not allowed".to_string()));
            }
        }

        if self.state.clients.insert(id, client).is_err() {
            // Ids are never reused; this cannot happen.
            warn!(client = %id, "duplicate client id");
        }
    }

    fn client_line(&mut self, client: ClientId, line: String) {
        let msg: ClientMessage = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(err) => {
                // Malformed input is answered, never fatal to the server
                // or the connection.
                self.send_to(client, DaemonMessage::error(format!("bad message: {err}")));
                return;
            }
        };

        if !msg.protocol_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client = %client,
                client_version = %msg.protocol_version,
                server_version = %ProtocolVersion::CURRENT,
                "protocol version mismatch"
            );
            if let Some(c) = self.state.clients.find_mut(&client) {
                c.mark_exit(Some(format!(
                    "protocol version {} not compatible with {}",
                    msg.protocol_version,
                    ProtocolVersion::CURRENT
                )));
            }
            return;
        }

        match msg.message {
            MessageType::Identify { name } => {
                if let Some(c) = self.state.clients.find_mut(&client) {
                    c.identified = true;
                    c.name = name;
                    c.send(DaemonMessage::identified(client.as_u64()));
                    debug!(client = %client, name = ?c.name, "client identified");
                }
            }
            MessageType::Submit { command } => self.queue_from(client, command),
            MessageType::SubmitLine { line } => match parse_command_line(&line) {
                Ok(command) => self.queue_from(client, command),
                Err(err) => self.send_to(client, DaemonMessage::error(err.to_string())),
            },
            MessageType::Detach => self.queue_from(client, Command::DetachClient),
        }
    }

    fn queue_from(&mut self, client: ClientId, command: Command) {
        let identified = self
            .state
            .clients
            .find(&client)
            .is_some_and(|c| c.identified);
        if !identified {
            self.send_to(client, DaemonMessage::error("client has not identified"));
            return;
        }
        cmdq::enqueue(&mut self.state, Some(client), command);
    }

    fn send_to(&self, client: ClientId, msg: DaemonMessage) {
        if let Some(c) = self.state.clients.find(&client) {
            c.send(msg);
        }
    }

    fn client_gone(&mut self, client: ClientId) {
        self.state.detach_client(client);
        if let Some(c) = self.state.clients.remove(&client) {
            c.cancel_reader();
            debug!(client = %client, name = ?c.name, "client closed");
        }
    }

    fn handle_signal(&mut self, sig: ServerSignal) -> Result<(), ServerError> {
        match sig {
            ServerSignal::Interrupt | ServerSignal::Terminate => {
                info!(signal = ?sig, "shutdown requested");
                lifecycle::begin_shutdown(&mut self.state);
            }
            ServerSignal::Child => {
                reaper::handle_sigchld(&mut self.state).map_err(ServerError::Reap)?;
            }
            ServerSignal::RotateSocket => self.rotate_socket(),
            ServerSignal::ToggleLogging => {
                if let Some(log_control) = &mut self.log_control {
                    log_control.toggle();
                }
            }
        }
        Ok(())
    }

    /// Recreates the listening socket in place (SIGUSR1). The old listener
    /// keeps serving if creation fails.
    fn rotate_socket(&mut self) {
        match create_socket(&self.socket_path, self.default_socket) {
            Ok(listener) => {
                if let Some(ctl) = &self.acceptor_ctl {
                    let _ = ctl.send(AcceptorCtl::Replace(listener));
                }
                self.last_attached = None;
                self.update_socket();
                info!(socket = %self.socket_path.display(), "socket recreated");
            }
            Err(err) => warn!(error = %err, "failed to recreate socket"),
        }
    }

    /// Sends pending exit notices and closes those connections' writers so
    /// the notice flushes before the socket shuts.
    fn service_clients(&mut self) {
        for id in self.state.clients.keys_snapshot() {
            let Some(client) = self.state.clients.find_mut(&id) else {
                continue;
            };
            if !client.exit_pending() || client.exit_sent {
                continue;
            }
            client.exit_sent = true;
            let message = client.exit_message();
            client.send(DaemonMessage::exit(message));
            client.close_writer();
            self.state.detach_client(id);
        }
    }

    /// Toggles the socket's owner-execute bit on attached-count
    /// zero-crossings: set while any session has an attached client.
    fn update_socket(&mut self) {
        let attached = self.state.sessions.any_attached();
        if self.last_attached == Some(attached) {
            return;
        }
        self.last_attached = Some(attached);

        let perms = match fs::metadata(&self.socket_path) {
            Ok(meta) => meta.permissions(),
            Err(err) => {
                debug!(error = %err, "socket stat failed");
                return;
            }
        };
        let mode = if attached {
            perms.mode() | 0o100
        } else {
            perms.mode() & !0o100
        };
        if let Err(err) = fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(mode)) {
            warn!(error = %err, "socket chmod failed");
        }
    }

    /// The exit evaluation, run at the end of every pass:
    /// - exit-empty disabled and no explicit exit: keep running;
    /// - exit-unattached disabled and sessions remain: keep running;
    /// - any client still attached to a session: keep running;
    /// - any client connection still open: keep running;
    /// - any background job still running: keep running.
    fn check_exit(&self) -> bool {
        let state = &self.state;
        if !state.options.exit_empty && !state.exiting {
            return false;
        }
        if !state.options.exit_unattached && !state.sessions.is_empty() {
            return false;
        }
        if state.clients.values().any(|c| c.session.is_some()) {
            return false;
        }
        if !state.clients.is_empty() {
            return false;
        }
        if state.jobs.still_running() {
            return false;
        }
        true
    }
}

/// Creates the listening socket: unlink any stale path, bind, restrict
/// permissions, set non-blocking, register with the runtime.
fn create_socket(path: &Path, default_socket: bool) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "removed stale socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    // std bind listens with backlog 128.
    let listener = std::os::unix::net::UnixListener::bind(path)?;
    let mode = if default_socket { 0o660 } else { 0o600 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}
