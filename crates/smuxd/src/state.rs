//! Server state owned by the control loop.
//!
//! Every registry and counter the daemon mutates lives here and is touched
//! only from the control-loop task. Auxiliary tasks (acceptor, signal
//! listener, per-connection readers) never hold a reference to this
//! struct; they forward events into the loop's channel instead, so no
//! locking is needed anywhere.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use smux_core::{
    ClientId, IdAllocator, MarkedPane, MessageLog, ProjectId, ProjectStore, ServerOptions,
    SessionId, SessionStore, WindowStore,
};
use smux_protocol::{Command, DaemonMessage};

use crate::jobs::JobTable;

/// A connected client as the control loop sees it.
///
/// The socket itself is owned by two spawned tasks; the loop talks to the
/// writer task through `writer` and stops the reader through `cancel`.
#[derive(Debug)]
pub struct Client {
    /// Process-lifetime unique id.
    pub id: ClientId,
    /// Name supplied at identification, for logs and listings.
    pub name: Option<String>,
    /// Session this client is attached to, if any.
    pub session: Option<SessionId>,
    /// Set once the client has sent `identify`. Commands are queued only
    /// for identified clients.
    pub identified: bool,
    /// Pending commands, drained in FIFO order by the control loop.
    pub queue: VecDeque<Command>,
    /// Set when the client has been marked for exit; holds the optional
    /// reason shown to the user.
    exit: Option<Option<String>>,
    /// The exit notice has been written; the connection is closing.
    pub exit_sent: bool,
    writer: Option<mpsc::UnboundedSender<DaemonMessage>>,
    cancel: CancellationToken,
}

impl Client {
    /// Creates a client record for a freshly accepted connection.
    pub fn new(
        id: ClientId,
        writer: Option<mpsc::UnboundedSender<DaemonMessage>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: None,
            session: None,
            identified: false,
            queue: VecDeque::new(),
            exit: None,
            exit_sent: false,
            writer,
            cancel,
        }
    }

    /// Queues an outgoing message. Silently dropped once the writer has
    /// been closed; the connection is going away anyway.
    pub fn send(&self, msg: DaemonMessage) {
        if let Some(writer) = &self.writer {
            let _ = writer.send(msg);
        }
    }

    /// Marks the client for exit. The first reason wins; later marks do
    /// not overwrite it.
    pub fn mark_exit(&mut self, message: Option<String>) {
        if self.exit.is_none() {
            self.exit = Some(message);
        }
    }

    /// True once the client has been marked for exit.
    pub fn exit_pending(&self) -> bool {
        self.exit.is_some()
    }

    /// The exit reason, if one was given.
    pub fn exit_message(&self) -> Option<String> {
        self.exit.clone().flatten()
    }

    /// Drops the writer so the writer task flushes queued messages and
    /// closes its half of the socket.
    pub fn close_writer(&mut self) {
        self.writer = None;
    }

    /// Stops this connection's reader task.
    pub fn cancel_reader(&self) {
        self.cancel.cancel();
    }
}

/// All state the control loop owns.
#[derive(Debug)]
pub struct ServerState {
    /// Project arena and name registry.
    pub projects: ProjectStore,
    /// Session registry.
    pub sessions: SessionStore,
    /// Window and pane registry.
    pub windows: WindowStore,
    /// Connected clients by id.
    pub clients: smux_core::Registry<ClientId, Client>,
    /// The marked pane, validated lazily.
    pub marked: MarkedPane,
    /// Bounded server message log.
    pub messages: MessageLog,
    /// Global options the loop reads.
    pub options: ServerOptions,
    /// Background jobs.
    pub jobs: JobTable,
    /// Commands not issued by any client.
    pub global_queue: VecDeque<Command>,
    /// Projects whose reference count reached zero this pass; finalized at
    /// the start of the next pass, never inline.
    pub pending_finalize: Vec<ProjectId>,
    /// Wall-clock time, refreshed once per loop pass so every operation in
    /// a pass observes the same instant.
    pub current_time: DateTime<Utc>,
    /// Shutdown has been requested.
    pub exiting: bool,
    client_ids: IdAllocator,
}

impl ServerState {
    /// Creates empty state.
    pub fn new(options: ServerOptions) -> Self {
        Self {
            projects: ProjectStore::new(),
            sessions: SessionStore::new(),
            windows: WindowStore::new(),
            clients: smux_core::Registry::new(),
            marked: MarkedPane::default(),
            messages: MessageLog::default(),
            options,
            jobs: JobTable::new(),
            global_queue: VecDeque::new(),
            pending_finalize: Vec::new(),
            current_time: Utc::now(),
            exiting: false,
            client_ids: IdAllocator::default(),
        }
    }

    /// Allocates the next client id.
    pub fn next_client_id(&mut self) -> ClientId {
        ClientId(self.client_ids.next_id())
    }

    /// Appends to the server message log under the configured limit.
    pub fn add_message(&mut self, text: impl Into<String>) {
        let limit = self.options.message_limit;
        let now = self.current_time;
        self.messages.add(text.into(), limit, now);
    }

    /// Attaches a client to a session, detaching it from its previous one
    /// first.
    pub fn attach_client(&mut self, client: ClientId, session: SessionId) {
        self.detach_client(client);
        if let Some(s) = self.sessions.get_mut(session) {
            s.attached += 1;
            s.activity_at = self.current_time;
        }
        if let Some(c) = self.clients.find_mut(&client) {
            c.session = Some(session);
        }
    }

    /// Detaches a client from its session, if attached. Returns the
    /// session it was attached to.
    pub fn detach_client(&mut self, client: ClientId) -> Option<SessionId> {
        let session = self.clients.find_mut(&client)?.session.take()?;
        if let Some(s) = self.sessions.get_mut(session) {
            s.attached = s.attached.saturating_sub(1);
        }
        Some(session)
    }

    /// The project the client's current session belongs to.
    pub fn client_project(&self, client: ClientId) -> Option<ProjectId> {
        let session = self.clients.find(&client)?.session?;
        self.sessions.get(session)?.project
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach_counts() {
        let mut state = ServerState::new(ServerOptions::default());
        let sid = state
            .sessions
            .create("main", None, state.current_time)
            .unwrap();
        let other = state
            .sessions
            .create("other", None, state.current_time)
            .unwrap();

        let cid = state.next_client_id();
        let client = Client::new(cid, None, CancellationToken::new());
        state.clients.insert(cid, client).unwrap();

        state.attach_client(cid, sid);
        assert_eq!(state.sessions.get(sid).unwrap().attached, 1);

        // Switching sessions moves the count, never double-counts.
        state.attach_client(cid, other);
        assert_eq!(state.sessions.get(sid).unwrap().attached, 0);
        assert_eq!(state.sessions.get(other).unwrap().attached, 1);

        assert_eq!(state.detach_client(cid), Some(other));
        assert_eq!(state.sessions.get(other).unwrap().attached, 0);
        assert_eq!(state.detach_client(cid), None);
    }

    #[test]
    fn test_exit_mark_first_reason_wins() {
        let mut client = Client::new(ClientId(0), None, CancellationToken::new());
        assert!(!client.exit_pending());

        client.mark_exit(Some("access not allowed".into()));
        client.mark_exit(Some("detached".into()));
        assert_eq!(client.exit_message().as_deref(), Some("access not allowed"));
    }
}
