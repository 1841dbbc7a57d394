//! Resource lifecycle orchestration.
//!
//! Composes the store primitives into the fixed teardown orders the rest
//! of the daemon relies on. The rules, in short:
//!
//! - Destroying a project detaches its sessions, never destroys them.
//! - A project record is freed only by the deferred finalize pass, after
//!   its reference count reaches zero. Nothing frees inline.
//! - Destroying a session destroys its windows and detaches its clients.
//! - Shutdown destroys everything without emitting notifications.

use std::mem;

use tracing::{debug, info};

use smux_core::{ProjectId, RefAction, SessionId};

use crate::state::ServerState;

/// Takes a hold on a project for an in-flight operation.
pub fn project_add_ref(state: &mut ServerState, id: ProjectId, from: &str) {
    state.projects.add_ref(id, from);
}

/// Drops a hold on a project. A zero-crossing schedules the free for the
/// next control-loop pass instead of freeing here - code further up the
/// current call stack may still hold the id.
pub fn project_remove_ref(state: &mut ServerState, id: ProjectId, from: &str) {
    if state.projects.remove_ref(id, from) == RefAction::ScheduleFree {
        state.pending_finalize.push(id);
    }
}

/// Destroys a project.
///
/// Ordering: unlink from the name registry, notify, detach member
/// sessions, release owned resources, then drop the creator's hold. The
/// record itself survives until the deferred finalize pass. Idempotent.
pub fn project_destroy(state: &mut ServerState, id: ProjectId, notify: bool, from: &str) {
    let Some(name) = state.projects.begin_destroy(id) else {
        return;
    };

    if notify {
        state.add_message(format!("project {name} closed"));
    }

    for sid in state.projects.take_sessions(id) {
        if let Some(session) = state.sessions.get_mut(sid) {
            session.project = None;
            debug!(session = %session.name, project = %name, "session detached");
        }
    }

    state.projects.release_owned(id);
    project_remove_ref(state, id, from);
}

/// Runs the finalize pass: frees every project whose zero-crossing was
/// recorded on a previous pass. Projects that re-acquired a hold in the
/// meantime are skipped; their next zero-crossing reschedules them.
pub fn run_pending_finalize(state: &mut ServerState) {
    for id in mem::take(&mut state.pending_finalize) {
        state.projects.finalize(id);
    }
}

/// Destroys a session: removes it from the registry, detaches it from its
/// project, destroys its windows, and detaches every client viewing it.
pub fn session_destroy(state: &mut ServerState, id: SessionId) {
    let Some(session) = state.sessions.remove(id) else {
        return;
    };

    if let Some(project) = session.project {
        state.projects.detach_session(project, id);
    }

    for wid in &session.windows {
        state.windows.remove(*wid);
    }

    if !state.marked.check(&state.sessions, &state.windows) {
        state.marked.clear();
    }

    let mut detached = Vec::new();
    for cid in state.clients.keys_snapshot() {
        if let Some(client) = state.clients.find_mut(&cid) {
            if client.session == Some(id) {
                client.session = None;
                client.mark_exit(Some(format!("session {} closed", session.name)));
                detached.push(cid);
            }
        }
    }
    if !detached.is_empty() {
        debug!(session = %session.name, clients = detached.len(), "clients detached");
    }
}

/// The shutdown sequence, triggered by interrupt, terminate, or an
/// explicit exit command.
///
/// Drops unexecuted queue items, marks every client for exit, destroys
/// every session, and destroys every project without notifications. The
/// control loop then converges: clients flush and disconnect, deferred
/// frees run, and the exit evaluation passes.
pub fn begin_shutdown(state: &mut ServerState) {
    if state.exiting {
        return;
    }
    state.exiting = true;
    info!("server exiting");

    let dropped = state.global_queue.len()
        + state
            .clients
            .values()
            .map(|c| c.queue.len())
            .sum::<usize>();
    if dropped > 0 {
        debug!(dropped, "dropping queued commands");
    }
    state.global_queue.clear();
    for client in state.clients.values_mut() {
        client.queue.clear();
        client.mark_exit(None);
    }

    for sid in state.sessions.ids_snapshot() {
        session_destroy(state, sid);
    }
    for id in state.projects.ids_snapshot() {
        project_destroy(state, id, false, "shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smux_core::ServerOptions;

    use std::path::Path;

    fn state() -> ServerState {
        ServerState::new(ServerOptions::default())
    }

    fn make_project(state: &mut ServerState, name: &str) -> ProjectId {
        state
            .projects
            .create("project", Some(name), Path::new("/tmp"), None, state.current_time)
            .unwrap()
    }

    #[test]
    fn test_destroy_detaches_sessions_without_destroying_them() {
        let mut state = state();
        let pid = make_project(&mut state, "work");
        let sid = state
            .sessions
            .create("main", Some(pid), state.current_time)
            .unwrap();
        state.projects.attach_session(pid, sid);

        project_destroy(&mut state, pid, true, "test");

        // Session survives, orphaned.
        let session = state.sessions.get(sid).unwrap();
        assert_eq!(session.project, None);
        assert!(state.projects.find("work").is_none());

        // Notification was logged.
        assert!(state.messages.iter().any(|m| m.text.contains("work")));
    }

    #[test]
    fn test_free_deferred_to_next_pass() {
        let mut state = state();
        let pid = make_project(&mut state, "work");

        project_destroy(&mut state, pid, false, "test");

        // Zero-crossing recorded but record still present.
        assert_eq!(state.pending_finalize, vec![pid]);
        assert!(state.projects.get(pid).is_some());

        run_pending_finalize(&mut state);
        assert!(state.projects.get(pid).is_none());
        assert!(state.pending_finalize.is_empty());
    }

    #[test]
    fn test_destroy_with_outstanding_hold() {
        let mut state = state();
        let pid = make_project(&mut state, "work");

        project_add_ref(&mut state, pid, "in-flight");
        project_destroy(&mut state, pid, false, "test");

        // Not schedulable while the hold remains.
        assert!(state.pending_finalize.is_empty());
        run_pending_finalize(&mut state);
        assert!(state.projects.get(pid).is_some());

        project_remove_ref(&mut state, pid, "in-flight");
        assert_eq!(state.pending_finalize, vec![pid]);
        run_pending_finalize(&mut state);
        assert!(state.projects.get(pid).is_none());
    }

    #[test]
    fn test_destroy_idempotent_single_unref() {
        let mut state = state();
        let pid = make_project(&mut state, "work");

        project_destroy(&mut state, pid, false, "first");
        project_destroy(&mut state, pid, false, "second");

        // Only one zero-crossing despite two destroy calls.
        assert_eq!(state.pending_finalize, vec![pid]);
    }

    #[test]
    fn test_session_destroy_removes_windows() {
        let mut state = state();
        let sid = state
            .sessions
            .create("main", None, state.current_time)
            .unwrap();
        let wid = state.windows.create(sid, Some(100));
        state.sessions.get_mut(sid).unwrap().windows.push(wid);

        session_destroy(&mut state, sid);
        assert!(state.sessions.get(sid).is_none());
        assert!(state.windows.get(wid).is_none());
    }

    #[test]
    fn test_shutdown_destroys_everything_quietly() {
        let mut state = state();
        let pid = make_project(&mut state, "work");
        let sid = state
            .sessions
            .create("main", Some(pid), state.current_time)
            .unwrap();
        state.projects.attach_session(pid, sid);

        begin_shutdown(&mut state);

        assert!(state.exiting);
        assert!(state.sessions.is_empty());
        assert!(state.projects.is_empty());
        // No notifications on the shutdown path.
        assert!(state.messages.is_empty());

        // A second request is a no-op.
        begin_shutdown(&mut state);
        assert_eq!(state.pending_finalize, vec![pid]);
    }
}
