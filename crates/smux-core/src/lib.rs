//! smux core - domain types for the terminal multiplexer daemon.
//!
//! This crate holds the pure state the daemon mutates: ordered registries,
//! the project/session/window data model with reference-counted project
//! lifecycles, the bounded message log, and the marked pane. Nothing in
//! here does I/O; the daemon crate owns the event loop and drives these
//! stores from a single task.

pub mod environ;
pub mod error;
pub mod ids;
pub mod marked;
pub mod message;
pub mod options;
pub mod project;
pub mod registry;
pub mod session;
pub mod window;

// Re-exports for convenience
pub use environ::Environ;
pub use error::{CoreError, CoreResult};
pub use ids::{ClientId, IdAllocator, PaneId, ProjectId, SessionId, WindowId};
pub use marked::MarkedPane;
pub use message::{MessageEntry, MessageLog};
pub use options::ServerOptions;
pub use project::{Project, ProjectStore, RefAction};
pub use registry::Registry;
pub use session::{Session, SessionStore};
pub use window::{Pane, Window, WindowStore};
