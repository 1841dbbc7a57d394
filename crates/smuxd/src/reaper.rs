//! Child process reaper.
//!
//! One SIGCHLD may stand for any number of dead children, so the handler
//! drains `waitpid` until it would block. Routing is by pid: a linear scan
//! over panes (process exits are rare relative to loop passes), then the
//! job table. Stops from terminal-control signals are ignored; any other
//! stop gets the process group continued so a pane cannot wedge itself
//! with a stray SIGSTOP.

use std::io;

use tracing::{debug, info};

use crate::lifecycle;
use crate::state::ServerState;

/// Drains every pending child status. Called for each SIGCHLD.
///
/// # Errors
///
/// A `waitpid` failure other than ECHILD means child bookkeeping is
/// broken beyond recovery; the error is returned so the server
/// terminates with a diagnostic instead of running with unreapable
/// children.
pub fn handle_sigchld(state: &mut ServerState) -> io::Result<()> {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
        match pid {
            0 => return Ok(()),
            -1 => {
                let err = io::Error::last_os_error();
                if wait_error_is_fatal(&err) {
                    return Err(err);
                }
                return Ok(());
            }
            pid => route_status(state, pid, status),
        }
    }
}

/// ECHILD just means every child is already reaped; anything else is
/// fatal.
fn wait_error_is_fatal(err: &io::Error) -> bool {
    err.raw_os_error() != Some(libc::ECHILD)
}

/// Routes one wait status to its owner.
pub fn route_status(state: &mut ServerState, pid: i32, status: i32) {
    if libc::WIFSTOPPED(status) {
        child_stopped(state, pid, status);
    } else if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
        child_exited(state, pid, status);
    }
}

fn child_exited(state: &mut ServerState, pid: i32, status: i32) {
    if let Some((window, pane)) = state.windows.find_pane_by_pid(pid) {
        debug!(pid, status, window = %window, pane = %pane, "pane process exited");
        let mut ready = false;
        if let Some(p) = state.windows.pane_mut(window, pane) {
            p.exit_status = Some(status);
            p.exited = true;
            p.status_ready = true;
            p.pid = None;
            ready = p.destroy_ready();
        }
        if ready {
            destroy_pane(state, window, pane);
        }
    }

    // The pid may belong to a background job instead of a pane.
    if let Some(job) = state.jobs.check_died(pid) {
        info!(pid, command = %job.command, status, "job finished");
    }
}

fn child_stopped(state: &mut ServerState, pid: i32, status: i32) {
    let sig = libc::WSTOPSIG(status);
    if sig == libc::SIGTTIN || sig == libc::SIGTTOU {
        return;
    }
    if state.windows.find_pane_by_pid(pid).is_some() {
        debug!(pid, sig, "continuing stopped pane process");
        let ret = unsafe { libc::killpg(pid, libc::SIGCONT) };
        if ret != 0 {
            unsafe { libc::kill(pid, libc::SIGCONT) };
        }
    }
}

fn destroy_pane(
    state: &mut ServerState,
    window: smux_core::WindowId,
    pane: smux_core::PaneId,
) {
    let session = state.windows.get(window).map(|w| w.session);
    let mut collapse = None;
    if state.windows.remove_pane(window, pane) {
        // Last pane took the window with it.
        if let Some(sid) = session {
            if let Some(s) = state.sessions.get_mut(sid) {
                s.windows.retain(|w| *w != window);
                if s.windows.is_empty() {
                    collapse = Some(sid);
                }
            }
        }
    }
    if let Some(sid) = collapse {
        lifecycle::session_destroy(state, sid);
    }
}
