//! Interactive history persistence.
//!
//! The prompt layer that would produce history entries lives outside the
//! daemon core, so there is nothing to write yet. The hook still runs on
//! the final-cleanup path, after jobs are killed and before the socket is
//! removed, so the shutdown ordering is fixed for when a prompt layer
//! arrives.

use tracing::debug;

use crate::state::ServerState;

/// Persists interactive prompt history on shutdown.
pub fn save(state: &ServerState) {
    // No prompt state exists; record that the hook ran.
    debug!(
        messages = state.messages.len(),
        "no interactive history to persist"
    );
}
