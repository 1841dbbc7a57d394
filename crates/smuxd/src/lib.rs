//! smux daemon - server control loop and resource lifecycle manager.
//!
//! This crate is the daemon's engine:
//! - `server` - the control loop, socket acceptor, and per-connection I/O
//! - `state` - all mutable state, owned by the control-loop task
//! - `lifecycle` - ordered teardown of projects, sessions, and windows
//! - `cmdq` - FIFO command queues, drained to quiescence every pass
//! - `reaper` - SIGCHLD handling and exit-status routing
//! - `signals` - signal-to-event forwarding
//! - `jobs` / `acl` / `logging` / `history` - background jobs, admission,
//!   log toggle, history persistence
//!
//! # Concurrency model
//!
//! All registries are mutated from exactly one task. Auxiliary tasks
//! communicate with it over a single event channel and never share state;
//! there is no lock anywhere in the daemon.

pub mod acl;
pub mod cmdq;
pub mod history;
pub mod jobs;
pub mod lifecycle;
pub mod logging;
pub mod reaper;
pub mod server;
pub mod signals;
pub mod state;

pub use server::{default_socket_path, Server, ServerError};

pub use smux_core::ServerOptions;
