//! Sessions: collections of windows with an attachment state.
//!
//! The server core treats sessions mostly as collaborators - their screen
//! contents and window layout live elsewhere. What matters here is the
//! registry, the weak project back-reference, and the attached-client
//! count the control loop and socket-mode logic read.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::ids::{IdAllocator, ProjectId, SessionId, WindowId};
use crate::registry::Registry;

/// A session record.
#[derive(Debug, Clone)]
pub struct Session {
    /// Process-lifetime unique id.
    pub id: SessionId,
    /// Unique session name.
    pub name: String,
    /// Weak back-reference to the owning project, if any. Sessions may
    /// exist with no project; destroying a project clears this without
    /// destroying the session.
    pub project: Option<ProjectId>,
    /// Number of clients currently attached.
    pub attached: u32,
    /// Windows belonging to this session, in creation order.
    pub windows: Vec<WindowId>,
    /// Last activity timestamp.
    pub activity_at: DateTime<Utc>,
}

/// Registry of sessions, keyed by id with a name index.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Registry<SessionId, Session>,
    names: Registry<String, SessionId>,
    ids: IdAllocator,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session, optionally inside a project.
    ///
    /// # Errors
    ///
    /// `CoreError::DuplicateKey` if the name is taken.
    pub fn create(
        &mut self,
        name: &str,
        project: Option<ProjectId>,
        now: DateTime<Utc>,
    ) -> CoreResult<SessionId> {
        if self.names.contains(&name.to_string()) {
            return Err(CoreError::duplicate(name));
        }
        let id = SessionId(self.ids.next_id());
        let session = Session {
            id,
            name: name.to_string(),
            project,
            attached: 0,
            windows: Vec::new(),
            activity_at: now,
        };
        self.sessions.insert(id, session)?;
        self.names.insert(name.to_string(), id)?;
        debug!(session = name, id = %id, "new session");
        Ok(id)
    }

    /// Looks up a session by id.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.find(&id)
    }

    /// Looks up a session mutably by id.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.find_mut(&id)
    }

    /// Looks up a session by name.
    pub fn find(&self, name: &str) -> Option<&Session> {
        let id = self.names.find(&name.to_string())?;
        self.sessions.find(id)
    }

    /// Removes a session record. Returns the record for the caller to
    /// detach from its project.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.names.remove(&session.name);
        debug!(session = %session.name, id = %id, "session removed");
        Some(session)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions exist.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session ids in id order; safe for destructive traversal.
    pub fn ids_snapshot(&self) -> Vec<SessionId> {
        self.sessions.keys_snapshot()
    }

    /// Iterates sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// True if at least one session has an attached client.
    pub fn any_attached(&self) -> bool {
        self.sessions.values().any(|s| s.attached > 0)
    }
}
