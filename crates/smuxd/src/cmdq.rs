//! Command queue engine.
//!
//! All state mutation goes through here. Commands sit in FIFO queues (one
//! global, one per identified client) and the control loop drains them at
//! the end of every pass. Draining repeats until a full sweep over every
//! queue executes nothing, so commands that enqueue follow-on commands
//! (new-project creating its initial session) complete within the same
//! pass, before any exit-condition check.

use std::env;
use std::path::PathBuf;

use tracing::{debug, warn};

use smux_core::{ClientId, ProjectId};
use smux_protocol::{Command, DaemonMessage};

use crate::lifecycle;
use crate::state::ServerState;

/// Appends a command to the issuing client's queue, or the global queue
/// when no client is given.
pub fn enqueue(state: &mut ServerState, client: Option<ClientId>, command: Command) {
    debug!(command = command.name(), client = ?client, "queued");
    match client.and_then(|id| state.clients.find_mut(&id)) {
        Some(c) => c.queue.push_back(command),
        None => state.global_queue.push_back(command),
    }
}

/// Drains every queue to quiescence: the global queue first, then each
/// identified client's queue in id order, sweeping again until a full
/// sweep runs nothing. Returns the number of commands executed.
pub fn drain_queues(state: &mut ServerState) -> usize {
    let mut total = 0;
    loop {
        let mut ran = 0;

        while let Some(command) = state.global_queue.pop_front() {
            run_command(state, None, command);
            ran += 1;
        }

        for cid in state.clients.keys_snapshot() {
            loop {
                let Some(command) = state
                    .clients
                    .find_mut(&cid)
                    .filter(|c| c.identified && !c.exit_pending())
                    .and_then(|c| c.queue.pop_front())
                else {
                    break;
                };
                run_command(state, Some(cid), command);
                ran += 1;
            }
        }

        total += ran;
        if ran == 0 {
            return total;
        }
    }
}

/// Runs one command and reports its outcome on the issuing client's
/// connection. Command failures are answers, never connection errors.
fn run_command(state: &mut ServerState, client: Option<ClientId>, command: Command) {
    let name = command.name();
    let result = dispatch(state, client, command);

    match client.and_then(|id| state.clients.find(&id)) {
        Some(c) => match &result {
            Ok(Some(output)) => c.send(DaemonMessage::done_with(output.clone())),
            Ok(None) => c.send(DaemonMessage::done()),
            Err(message) => c.send(DaemonMessage::error(message.clone())),
        },
        None => {
            if let Err(message) = &result {
                warn!(command = name, error = %message, "queued command failed");
            }
        }
    }
}

fn dispatch(
    state: &mut ServerState,
    client: Option<ClientId>,
    command: Command,
) -> Result<Option<String>, String> {
    match command {
        Command::NewProject { name, cwd } => new_project(state, client, name, cwd),
        Command::KillProject { target, all_others } => {
            kill_project(state, client, target, all_others)
        }
        Command::RenameProject { target, new_name } => {
            rename_project(state, client, target, new_name)
        }
        Command::SwitchProject { target } => switch_project(state, client, target),
        Command::NewSession { name, project } => new_session(state, client, name, project),
        Command::KillSession { target } => kill_session(state, target),
        Command::DetachClient => detach_client(state, client),
        Command::DisplayMessage { text } => {
            state.add_message(text.clone());
            Ok(Some(text))
        }
        Command::ListProjects => list_projects(state),
        Command::Exit => {
            lifecycle::begin_shutdown(state);
            Ok(None)
        }
    }
}

/// Resolves a project target: by name, by `#<id>` reference, or falling
/// back to the issuing client's current project.
fn resolve_project(
    state: &ServerState,
    client: Option<ClientId>,
    target: Option<&str>,
) -> Result<ProjectId, String> {
    if let Some(target) = target {
        if let Some(p) = state.projects.find(target) {
            return Ok(p.id);
        }
        if let Some(p) = state.projects.find_by_id_ref(target) {
            return Ok(p.id);
        }
        return Err(format!("can't find project: {target}"));
    }
    client
        .and_then(|id| state.client_project(id))
        .ok_or_else(|| "no current project".to_string())
}

fn new_project(
    state: &mut ServerState,
    client: Option<ClientId>,
    name: Option<String>,
    cwd: Option<String>,
) -> Result<Option<String>, String> {
    let cwd = cwd
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"));

    let id = state
        .projects
        .create("project", name.as_deref(), &cwd, None, state.current_time)
        .map_err(|e| e.to_string())?;
    let name = match state.projects.get(id) {
        Some(p) => p.name.clone(),
        None => return Err("project vanished during creation".to_string()),
    };

    // The initial session goes through the queue like any other command
    // and lands on the same drain pass.
    enqueue(
        state,
        client,
        Command::NewSession {
            name: Some(name.clone()),
            project: Some(name.clone()),
        },
    );

    Ok(Some(format!("created project {name}")))
}

fn kill_project(
    state: &mut ServerState,
    client: Option<ClientId>,
    target: Option<String>,
    all_others: bool,
) -> Result<Option<String>, String> {
    let keep_or_kill = resolve_project(state, client, target.as_deref())?;

    if all_others {
        let mut killed = 0;
        for name in state.projects.names_snapshot() {
            let Some(id) = state.projects.find_id(&name) else {
                continue;
            };
            if id != keep_or_kill {
                lifecycle::project_destroy(state, id, true, "kill-project");
                killed += 1;
            }
        }
        return Ok(Some(format!("killed {killed} projects")));
    }

    let name = state
        .projects
        .get(keep_or_kill)
        .map(|p| p.name.clone())
        .unwrap_or_default();
    lifecycle::project_destroy(state, keep_or_kill, true, "kill-project");
    Ok(Some(format!("killed project {name}")))
}

fn rename_project(
    state: &mut ServerState,
    client: Option<ClientId>,
    target: Option<String>,
    new_name: String,
) -> Result<Option<String>, String> {
    let id = resolve_project(state, client, target.as_deref())?;
    state
        .projects
        .rename(id, &new_name)
        .map_err(|e| e.to_string())?;
    Ok(Some(format!("renamed to {new_name}")))
}

fn switch_project(
    state: &mut ServerState,
    client: Option<ClientId>,
    target: Option<String>,
) -> Result<Option<String>, String> {
    let Some(cid) = client else {
        return Err("switch-project requires a client".to_string());
    };
    let id = resolve_project(state, client, target.as_deref())?;

    let (name, session) = match state.projects.get(id) {
        Some(p) => (p.name.clone(), p.current_session),
        None => return Err("project vanished".to_string()),
    };
    let session = session.ok_or_else(|| format!("project {name} has no sessions"))?;

    state.attach_client(cid, session);
    Ok(Some(format!("switched to project {name}")))
}

fn new_session(
    state: &mut ServerState,
    client: Option<ClientId>,
    name: Option<String>,
    project: Option<String>,
) -> Result<Option<String>, String> {
    let project_id = match project.as_deref() {
        Some(target) => Some(resolve_project(state, None, Some(target))?),
        None => None,
    };

    let name = match name {
        Some(name) => name,
        None => synthesize_session_name(state),
    };
    let sid = state
        .sessions
        .create(&name, project_id, state.current_time)
        .map_err(|e| e.to_string())?;

    if let Some(pid) = project_id {
        state.projects.attach_session(pid, sid);
        if let Some(p) = state.projects.get_mut(pid) {
            p.activity_at = state.current_time;
        }
    }
    if let Some(cid) = client {
        state.attach_client(cid, sid);
    }

    Ok(Some(format!("created session {name}")))
}

fn synthesize_session_name(state: &ServerState) -> String {
    let mut n = state.sessions.len();
    loop {
        let candidate = format!("session-{n}");
        if state.sessions.find(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

fn kill_session(state: &mut ServerState, target: String) -> Result<Option<String>, String> {
    let sid = state
        .sessions
        .find(&target)
        .map(|s| s.id)
        .ok_or_else(|| format!("can't find session: {target}"))?;
    lifecycle::session_destroy(state, sid);
    Ok(Some(format!("killed session {target}")))
}

fn detach_client(
    state: &mut ServerState,
    client: Option<ClientId>,
) -> Result<Option<String>, String> {
    let Some(cid) = client else {
        return Err("detach-client requires a client".to_string());
    };
    state.detach_client(cid);
    if let Some(c) = state.clients.find_mut(&cid) {
        c.mark_exit(Some("detached".to_string()));
    }
    Ok(None)
}

fn list_projects(state: &ServerState) -> Result<Option<String>, String> {
    let mut lines = Vec::new();
    for name in state.projects.names_snapshot() {
        let Some(p) = state.projects.find(&name) else {
            continue;
        };
        lines.push(format!(
            "{}: {} sessions (created {})",
            p.name,
            p.sessions.len(),
            p.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    Ok(Some(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Client;
    use smux_core::{ServerOptions, SessionId};
    use tokio_util::sync::CancellationToken;

    fn attached_session(state: &ServerState, client: ClientId) -> Option<SessionId> {
        state.clients.find(&client)?.session
    }

    fn state_with_client() -> (ServerState, ClientId) {
        let mut state = ServerState::new(ServerOptions::default());
        let cid = state.next_client_id();
        let mut client = Client::new(cid, None, CancellationToken::new());
        client.identified = true;
        state.clients.insert(cid, client).unwrap();
        (state, cid)
    }

    #[test]
    fn test_new_project_creates_initial_session_same_pass() {
        let (mut state, cid) = state_with_client();
        enqueue(
            &mut state,
            Some(cid),
            Command::NewProject {
                name: Some("work".into()),
                cwd: Some("/tmp".into()),
            },
        );

        let ran = drain_queues(&mut state);
        assert_eq!(ran, 2, "follow-on session must run in the same drain");

        let p = state.projects.find("work").unwrap();
        assert_eq!(p.sessions.len(), 1);
        let sid = attached_session(&state, cid).unwrap();
        assert_eq!(state.sessions.get(sid).unwrap().name, "work");
        assert_eq!(state.sessions.get(sid).unwrap().attached, 1);
    }

    #[test]
    fn test_kill_project_detaches_sessions() {
        let (mut state, cid) = state_with_client();
        enqueue(
            &mut state,
            Some(cid),
            Command::NewProject {
                name: Some("work".into()),
                cwd: None,
            },
        );
        drain_queues(&mut state);
        let sid = attached_session(&state, cid).unwrap();

        enqueue(
            &mut state,
            Some(cid),
            Command::KillProject {
                target: Some("work".into()),
                all_others: false,
            },
        );
        drain_queues(&mut state);

        assert!(state.projects.find("work").is_none());
        // The session survives the project.
        assert_eq!(state.sessions.get(sid).unwrap().project, None);
    }

    #[test]
    fn test_kill_all_others_keeps_target() {
        let (mut state, cid) = state_with_client();
        for name in ["a", "b", "c"] {
            enqueue(
                &mut state,
                Some(cid),
                Command::NewProject {
                    name: Some(name.into()),
                    cwd: None,
                },
            );
        }
        drain_queues(&mut state);
        assert_eq!(state.projects.len(), 3);

        enqueue(
            &mut state,
            Some(cid),
            Command::KillProject {
                target: Some("b".into()),
                all_others: true,
            },
        );
        drain_queues(&mut state);

        assert_eq!(state.projects.names_snapshot(), vec!["b".to_string()]);
    }

    #[test]
    fn test_target_resolution() {
        let (mut state, cid) = state_with_client();
        enqueue(
            &mut state,
            Some(cid),
            Command::NewProject {
                name: Some("work".into()),
                cwd: None,
            },
        );
        drain_queues(&mut state);
        let id = state.projects.find("work").unwrap().id;

        // By name, by #id reference, and by the client's current project.
        assert_eq!(resolve_project(&state, None, Some("work")), Ok(id));
        assert_eq!(
            resolve_project(&state, None, Some(&format!("#{id}"))),
            Ok(id)
        );
        assert_eq!(resolve_project(&state, Some(cid), None), Ok(id));
        assert!(resolve_project(&state, None, Some("nope")).is_err());
        assert!(resolve_project(&state, None, None).is_err());
    }

    #[test]
    fn test_unidentified_client_queue_not_drained() {
        let mut state = ServerState::new(ServerOptions::default());
        let cid = state.next_client_id();
        state
            .clients
            .insert(cid, Client::new(cid, None, CancellationToken::new()))
            .unwrap();

        enqueue(&mut state, Some(cid), Command::ListProjects);
        assert_eq!(drain_queues(&mut state), 0);
        assert_eq!(state.clients.find(&cid).unwrap().queue.len(), 1);
    }

    #[test]
    fn test_detach_marks_exit() {
        let (mut state, cid) = state_with_client();
        enqueue(&mut state, Some(cid), Command::DetachClient);
        drain_queues(&mut state);

        let c = state.clients.find(&cid).unwrap();
        assert!(c.exit_pending());
        assert_eq!(c.exit_message().as_deref(), Some("detached"));
    }

    #[test]
    fn test_exit_command_starts_shutdown() {
        let (mut state, cid) = state_with_client();
        enqueue(&mut state, Some(cid), Command::Exit);
        drain_queues(&mut state);
        assert!(state.exiting);
        assert!(state.clients.find(&cid).unwrap().exit_pending());
    }

    #[test]
    fn test_rename_and_switch() {
        let (mut state, cid) = state_with_client();
        enqueue(
            &mut state,
            Some(cid),
            Command::NewProject {
                name: Some("old".into()),
                cwd: None,
            },
        );
        drain_queues(&mut state);

        enqueue(
            &mut state,
            Some(cid),
            Command::RenameProject {
                target: Some("old".into()),
                new_name: "new".into(),
            },
        );
        drain_queues(&mut state);
        assert!(state.projects.find("new").is_some());

        // Second project, then switch back.
        enqueue(
            &mut state,
            Some(cid),
            Command::NewProject {
                name: Some("second".into()),
                cwd: None,
            },
        );
        drain_queues(&mut state);
        assert_eq!(
            state.sessions.get(attached_session(&state, cid).unwrap()).unwrap().name,
            "second"
        );

        enqueue(
            &mut state,
            Some(cid),
            Command::SwitchProject {
                target: Some("new".into()),
            },
        );
        drain_queues(&mut state);
        // The session keeps its creation name; only the project renamed.
        assert_eq!(
            state.sessions.get(attached_session(&state, cid).unwrap()).unwrap().name,
            "old"
        );
    }

    #[test]
    fn test_display_message_logged() {
        let (mut state, cid) = state_with_client();
        enqueue(
            &mut state,
            Some(cid),
            Command::DisplayMessage {
                text: "hello".into(),
            },
        );
        drain_queues(&mut state);
        assert_eq!(state.messages.iter().next().unwrap().text, "hello");
    }
}
