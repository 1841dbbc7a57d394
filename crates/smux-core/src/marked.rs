//! The marked pane: a single process-wide (session, window, pane) tuple.
//!
//! The mark has no lifecycle of its own. It stays set when any of the
//! referenced entities is destroyed and validity is re-checked lazily on
//! every access instead of being invalidated eagerly.

use crate::ids::{PaneId, SessionId, WindowId};
use crate::session::SessionStore;
use crate::window::WindowStore;

/// Optional process-wide marked pane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkedPane {
    target: Option<(SessionId, WindowId, PaneId)>,
}

impl MarkedPane {
    /// Creates an empty mark.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mark.
    pub fn set(&mut self, session: SessionId, window: WindowId, pane: PaneId) {
        self.target = Some((session, window, pane));
    }

    /// Clears the mark.
    pub fn clear(&mut self) {
        self.target = None;
    }

    /// Returns the marked tuple without checking validity.
    pub fn get(&self) -> Option<(SessionId, WindowId, PaneId)> {
        self.target
    }

    /// True if the given pane is the marked one and the mark is still
    /// valid.
    pub fn is_marked(
        &self,
        sessions: &SessionStore,
        windows: &WindowStore,
        session: SessionId,
        window: WindowId,
        pane: PaneId,
    ) -> bool {
        self.target == Some((session, window, pane)) && self.check(sessions, windows)
    }

    /// Lazy validity check: every referenced entity must still exist and
    /// the window must still belong to the marked session.
    pub fn check(&self, sessions: &SessionStore, windows: &WindowStore) -> bool {
        let Some((session, window, pane)) = self.target else {
            return false;
        };
        if sessions.get(session).is_none() {
            return false;
        }
        match windows.get(window) {
            Some(w) => w.session == session && w.panes.iter().any(|p| p.id == pane),
            None => false,
        }
    }
}
