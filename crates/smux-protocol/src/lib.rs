//! smux protocol - wire protocol for daemon communication.
//!
//! Newline-delimited JSON messages between clients and the daemon, the
//! structured command set clients may submit, and a parser from the
//! user-facing command-line form.

pub mod command;
pub mod message;
pub mod parse;
pub mod version;

pub use command::Command;
pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use parse::{parse_command_line, ParseError};
pub use version::ProtocolVersion;
