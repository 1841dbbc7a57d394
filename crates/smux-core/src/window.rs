//! Windows and panes, as seen by the server core.
//!
//! Rendering and pseudo-terminal I/O are external; the core tracks just
//! enough pane state for the child reaper: which pid a pane owns, whether
//! that process has exited, and whether the pane is ready to be destroyed.

use crate::ids::{IdAllocator, PaneId, SessionId, WindowId};
use crate::registry::Registry;

/// A pane holding one child process.
#[derive(Debug, Clone)]
pub struct Pane {
    /// Process-lifetime unique id.
    pub id: PaneId,
    /// Pid of the child process running in this pane, if still tracked.
    pub pid: Option<i32>,
    /// Raw wait status recorded when the child exited.
    pub exit_status: Option<i32>,
    /// The child process has exited.
    pub exited: bool,
    /// The exit status has been recorded and may be reported.
    pub status_ready: bool,
    /// Holds from in-flight operations that must complete before the pane
    /// may be destroyed.
    pub references: u32,
}

impl Pane {
    /// Destroy-readiness predicate: the child is gone and nothing still
    /// references the pane.
    pub fn destroy_ready(&self) -> bool {
        self.exited && self.references == 0
    }
}

/// A window: an ordered group of panes belonging to a session.
#[derive(Debug, Clone)]
pub struct Window {
    /// Process-lifetime unique id.
    pub id: WindowId,
    /// Owning session.
    pub session: SessionId,
    /// Panes in layout order.
    pub panes: Vec<Pane>,
}

/// Registry of windows keyed by id.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: Registry<WindowId, Window>,
    window_ids: IdAllocator,
    pane_ids: IdAllocator,
}

impl WindowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a window with a single pane running `pid`.
    pub fn create(&mut self, session: SessionId, pid: Option<i32>) -> WindowId {
        let id = WindowId(self.window_ids.next_id());
        let pane = Pane {
            id: PaneId(self.pane_ids.next_id()),
            pid,
            exit_status: None,
            exited: false,
            status_ready: false,
            references: 0,
        };
        let window = Window {
            id,
            session,
            panes: vec![pane],
        };
        // Freshly allocated id cannot collide.
        let _ = self.windows.insert(id, window);
        id
    }

    /// Adds a pane to an existing window, returning its id.
    pub fn add_pane(&mut self, window: WindowId, pid: Option<i32>) -> Option<PaneId> {
        let w = self.windows.find_mut(&window)?;
        let pane = Pane {
            id: PaneId(self.pane_ids.next_id()),
            pid,
            exit_status: None,
            exited: false,
            status_ready: false,
            references: 0,
        };
        let id = pane.id;
        w.panes.push(pane);
        Some(id)
    }

    /// Looks up a window by id.
    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.find(&id)
    }

    /// Looks up a window mutably by id.
    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.find_mut(&id)
    }

    /// Removes a window and all its panes.
    pub fn remove(&mut self, id: WindowId) -> Option<Window> {
        self.windows.remove(&id)
    }

    /// Window ids in order; safe for destructive traversal.
    pub fn ids_snapshot(&self) -> Vec<WindowId> {
        self.windows.keys_snapshot()
    }

    /// Iterates windows in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.values()
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// True if no windows exist.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Finds the window and pane owning `pid`.
    ///
    /// Linear scan across all windows and panes; process exits are rare
    /// relative to loop iterations.
    pub fn find_pane_by_pid(&self, pid: i32) -> Option<(WindowId, PaneId)> {
        for window in self.windows.values() {
            for pane in &window.panes {
                if pane.pid == Some(pid) {
                    return Some((window.id, pane.id));
                }
            }
        }
        None
    }

    /// Mutable access to a pane within a window.
    pub fn pane_mut(&mut self, window: WindowId, pane: PaneId) -> Option<&mut Pane> {
        self.windows
            .find_mut(&window)?
            .panes
            .iter_mut()
            .find(|p| p.id == pane)
    }

    /// Shared access to a pane within a window.
    pub fn pane(&self, window: WindowId, pane: PaneId) -> Option<&Pane> {
        self.windows
            .find(&window)?
            .panes
            .iter()
            .find(|p| p.id == pane)
    }

    /// Removes a pane from its window; removes the window too when it was
    /// the last pane. Returns true if the window went away with it.
    pub fn remove_pane(&mut self, window: WindowId, pane: PaneId) -> bool {
        let Some(w) = self.windows.find_mut(&window) else {
            return false;
        };
        w.panes.retain(|p| p.id != pane);
        if w.panes.is_empty() {
            self.windows.remove(&window);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_window_with_pane() {
        let mut store = WindowStore::new();
        let wid = store.create(SessionId(0), Some(100));

        let w = store.get(wid).unwrap();
        assert_eq!(w.panes.len(), 1);
        assert_eq!(w.panes[0].pid, Some(100));
        assert!(!w.panes[0].destroy_ready());
    }

    #[test]
    fn test_find_pane_by_pid() {
        let mut store = WindowStore::new();
        let w1 = store.create(SessionId(0), Some(100));
        let w2 = store.create(SessionId(0), Some(200));
        let extra = store.add_pane(w2, Some(300)).unwrap();

        assert_eq!(store.find_pane_by_pid(300), Some((w2, extra)));
        assert!(store.find_pane_by_pid(100).is_some_and(|(w, _)| w == w1));
        assert_eq!(store.find_pane_by_pid(999), None);
    }

    #[test]
    fn test_destroy_ready_requires_exit_and_no_refs() {
        let mut store = WindowStore::new();
        let wid = store.create(SessionId(0), Some(100));
        let pid_pane = store.get(wid).unwrap().panes[0].id;

        let pane = store.pane_mut(wid, pid_pane).unwrap();
        pane.references = 1;
        pane.exited = true;
        assert!(!pane.destroy_ready());

        pane.references = 0;
        assert!(pane.destroy_ready());
    }

    #[test]
    fn test_remove_last_pane_removes_window() {
        let mut store = WindowStore::new();
        let wid = store.create(SessionId(0), Some(100));
        let p2 = store.add_pane(wid, Some(200)).unwrap();
        let p1 = store.get(wid).unwrap().panes[0].id;

        assert!(!store.remove_pane(wid, p1));
        assert!(store.get(wid).is_some());

        assert!(store.remove_pane(wid, p2));
        assert!(store.get(wid).is_none());
    }
}
