//! Protocol message types for daemon communication.
//!
//! Messages are newline-delimited JSON. Clients open a connection, send
//! `identify`, then submit commands; the daemon answers each command with
//! `done` or `error` and ends the conversation with `exit`.

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::version::ProtocolVersion;

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Identify this connection. Commands are only queued for identified
    /// clients.
    Identify {
        /// Optional client name for logs and listings.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Submit a structured command for the client's queue.
    Submit {
        #[serde(flatten)]
        command: Command,
    },

    /// Submit a command as a single line to be parsed server-side.
    SubmitLine {
        /// The command line, e.g. `new-project -n work`.
        line: String,
    },

    /// Detach from the current session and close the connection.
    Detach,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with the current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates an identify message.
    pub fn identify(name: Option<String>) -> Self {
        Self::new(MessageType::Identify { name })
    }

    /// Creates a structured command submission.
    pub fn submit(command: Command) -> Self {
        Self::new(MessageType::Submit { command })
    }

    /// Creates a command-line submission.
    pub fn submit_line(line: impl Into<String>) -> Self {
        Self::new(MessageType::SubmitLine { line: line.into() })
    }

    /// Creates a detach message.
    pub fn detach() -> Self {
        Self::new(MessageType::Detach)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// The connection was accepted and identified.
    Identified {
        /// Server-assigned client id.
        client_id: u64,
    },

    /// A command completed.
    Done {
        /// Printable output, if the command produced any.
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },

    /// A command failed.
    Error {
        /// Human-readable reason.
        message: String,
    },

    /// The daemon is closing this connection.
    Exit {
        /// Reason shown to the user, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates an identified response.
    pub fn identified(client_id: u64) -> Self {
        Self::Identified { client_id }
    }

    /// Creates a done response without output.
    pub fn done() -> Self {
        Self::Done { output: None }
    }

    /// Creates a done response with output.
    pub fn done_with(output: impl Into<String>) -> Self {
        Self::Done {
            output: Some(output.into()),
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Creates an exit notice.
    pub fn exit(message: Option<String>) -> Self {
        Self::Exit { message }
    }
}
