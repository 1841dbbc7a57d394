//! Structured commands: the payloads of command-queue items.
//!
//! Clients submit these over the socket; the daemon appends them to the
//! issuing client's queue and the control loop executes them in FIFO
//! order. A project target is a name or the `#<id>` reference form; when
//! absent the daemon falls back to the client's current project.

use serde::{Deserialize, Serialize};

/// A state-mutating operation accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Create a project, optionally with a fixed name and start directory.
    NewProject {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// Destroy a project, detaching (not destroying) its sessions. With
    /// `all_others` set, destroys every project except the target.
    KillProject {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default)]
        all_others: bool,
    },

    /// Rename a project.
    RenameProject {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        new_name: String,
    },

    /// Switch the issuing client to a session in the target project.
    SwitchProject {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },

    /// Create a session, optionally inside a project.
    NewSession {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        project: Option<String>,
    },

    /// Destroy a session by name.
    KillSession { target: String },

    /// Detach the issuing client from its session.
    DetachClient,

    /// Append a message to the server message log.
    DisplayMessage { text: String },

    /// List live projects with their session counts.
    ListProjects,

    /// Request a server exit (as if interrupted).
    Exit,
}

impl Command {
    /// The user-facing command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::NewProject { .. } => "new-project",
            Command::KillProject { .. } => "kill-project",
            Command::RenameProject { .. } => "rename-project",
            Command::SwitchProject { .. } => "switch-project",
            Command::NewSession { .. } => "new-session",
            Command::KillSession { .. } => "kill-session",
            Command::DetachClient => "detach-client",
            Command::DisplayMessage { .. } => "display-message",
            Command::ListProjects => "list-projects",
            Command::Exit => "kill-server",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_shape() {
        let cmd = Command::NewProject {
            name: Some("work".into()),
            cwd: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"new-project\""));
        assert!(json.contains("\"name\":\"work\""));
        assert!(!json.contains("cwd"));

        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_all_others_defaults_false() {
        let json = r#"{"command":"kill-project","target":"work"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            Command::KillProject {
                target: Some("work".into()),
                all_others: false
            }
        );
    }
}
